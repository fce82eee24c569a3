pub mod assessment;
pub mod code;
pub mod loaders;
pub mod result;
pub mod rubric;
pub mod student;

pub use assessment::{percentage, Assessment, CriterionScore};
pub use code::{BlobSource, CodeBlob, CodeChunk, FILE_MARKER_PREFIX};
pub use loaders::{load_roster, load_rubric};
pub use result::SubmissionResult;
pub use rubric::{Criterion, Level, Rubric};
pub use student::Student;
