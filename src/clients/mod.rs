pub mod github_client;
pub mod llm_client;

pub use github_client::{GitHubEndpoints, RepoCoordinates};
pub use llm_client::{ChatProvider, ChatRequest, OpenAiChat};
