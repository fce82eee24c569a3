use serde::{Deserialize, Serialize};

/// 名单中的一名学生
///
/// 兼容旧表格列名 `Name` / `GitHub URL`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "GitHub URL", alias = "github_url", default)]
    pub repo_url: String,
}

impl Student {
    pub fn new(name: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo_url: repo_url.into(),
        }
    }
}
