pub mod assessment;
pub mod error_log;
pub mod repo_fetcher;
pub mod sanitizer;
pub mod score_parser;

pub use assessment::{AssessmentClient, AssessmentOptions};
pub use error_log::ErrorLogWriter;
pub use repo_fetcher::{FetchOptions, RepoSource, RepositoryFetcher};
pub use sanitizer::{chunk, ContentSanitizer};
pub use score_parser::{ParsedScores, ScoreParser, ScoreParserChain};
