/// GitHub 地址解析与接口地址拼装
///
/// 只负责"地址长什么样"，不发请求
use serde::Deserialize;
use url::Url;

use crate::error::InputError;

/// 仓库坐标 owner/name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCoordinates {
    pub owner: String,
    pub name: String,
}

impl RepoCoordinates {
    /// 解析并归一化仓库地址
    ///
    /// 去掉结尾的 `/` 和 `.git`；要求 http(s) 协议、主机名包含 github，
    /// 且路径至少有 owner 和仓库名两段。
    pub fn parse(repo_url: &str) -> Result<Self, InputError> {
        let trimmed = repo_url.trim();
        if trimmed.is_empty() {
            return Err(InputError::MissingUrl);
        }
        let invalid = || InputError::InvalidUrl {
            url: trimmed.to_string(),
        };
        if !trimmed.starts_with("http") {
            return Err(invalid());
        }

        let normalized = normalize_url(trimmed);
        let parsed = Url::parse(normalized).map_err(|_| invalid())?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid());
        }
        let host = parsed.host_str().ok_or_else(invalid)?;
        if !host.to_lowercase().contains("github") {
            return Err(invalid());
        }

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            [owner, name, ..] => Ok(Self {
                owner: owner.to_string(),
                name: name.trim_end_matches(".git").to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// 去掉结尾的 `/` 与 `.git`
pub fn normalize_url(url: &str) -> &str {
    let url = url.trim().trim_end_matches('/');
    url.strip_suffix(".git").unwrap_or(url)
}

/// GitHub 各类接口的根地址
#[derive(Debug, Clone)]
pub struct GitHubEndpoints {
    pub web_base: String,
    pub api_base: String,
    pub raw_base: String,
}

impl Default for GitHubEndpoints {
    fn default() -> Self {
        Self {
            web_base: "https://github.com".to_string(),
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
        }
    }
}

impl GitHubEndpoints {
    /// 仓库元数据（含默认分支）
    pub fn repo_metadata(&self, repo: &RepoCoordinates) -> String {
        format!("{}/repos/{}", self.api_base, repo.slug())
    }

    /// 分支压缩包
    pub fn branch_archive(&self, repo: &RepoCoordinates, branch: &str) -> String {
        format!(
            "{}/{}/archive/refs/heads/{}.zip",
            self.web_base,
            repo.slug(),
            branch
        )
    }

    /// 递归文件树
    pub fn tree(&self, repo: &RepoCoordinates, branch: &str) -> String {
        format!(
            "{}/repos/{}/git/trees/{}?recursive=1",
            self.api_base,
            repo.slug(),
            branch
        )
    }

    /// 单个文件原文
    pub fn raw_file(&self, repo: &RepoCoordinates, branch: &str, path: &str) -> String {
        format!("{}/{}/{}/{}", self.raw_base, repo.slug(), branch, path)
    }
}

/// `GET /repos/{owner}/{repo}` 的有用部分
#[derive(Debug, Deserialize)]
pub struct RepoMetadata {
    pub default_branch: Option<String>,
}

/// `GET /repos/{owner}/{repo}/git/trees/{branch}` 的响应
#[derive(Debug, Deserialize)]
pub struct TreeListing {
    #[serde(default)]
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let repo = RepoCoordinates::parse("https://github.com/alice/repo1.git/").unwrap();
        assert_eq!(repo.slug(), "alice/repo1");

        let repo = RepoCoordinates::parse("https://github.com/alice/repo1/tree/dev").unwrap();
        assert_eq!(repo.slug(), "alice/repo1");
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(matches!(
            RepoCoordinates::parse(""),
            Err(InputError::MissingUrl)
        ));
        for bad in [
            "not-a-url",
            "ftp://github.com/a/b",
            "https://gitlab.com/a/b",
            "https://github.com/onlyowner",
        ] {
            assert!(
                matches!(RepoCoordinates::parse(bad), Err(InputError::InvalidUrl { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn builds_endpoint_urls() {
        let endpoints = GitHubEndpoints::default();
        let repo = RepoCoordinates::parse("https://github.com/a/repo1").unwrap();
        assert_eq!(
            endpoints.branch_archive(&repo, "master"),
            "https://github.com/a/repo1/archive/refs/heads/master.zip"
        );
        assert_eq!(
            endpoints.tree(&repo, "main"),
            "https://api.github.com/repos/a/repo1/git/trees/main?recursive=1"
        );
        assert_eq!(
            endpoints.raw_file(&repo, "main", "src/app.py"),
            "https://raw.githubusercontent.com/a/repo1/main/src/app.py"
        );
    }
}
