//! 仓库获取服务 - 业务能力层
//!
//! 只负责"把一个仓库变成一段带文件标记的代码文本"，不关心评分
//!
//! 获取顺序：
//! 1. 查询仓库元数据，拿默认分支（拿不到也继续）
//! 2. 依次下载 默认分支 → main → master 的压缩包，解压到临时目录后遍历文件
//! 3. 全部分支都没有可用文件时，改用文件树 API 逐个拉取源码文件

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::clients::github_client::{GitHubEndpoints, RepoCoordinates, RepoMetadata, TreeListing};
use crate::config::Config;
use crate::error::FetchError;
use crate::infrastructure::HttpTransport;
use crate::models::code::{BlobSource, CodeBlob};

/// 二进制 / 媒体类扩展名，一律跳过
static BINARY_EXTENSIONS: phf::Set<&'static str> = phf::phf_set! {
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd",
    "mp3", "mp4", "wav", "ogg", "avi", "mov", "mkv", "flac", "webm",
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war",
    "exe", "dll", "so", "dylib", "bin", "o", "a", "class", "pyc", "pyo",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    "ttf", "otf", "woff", "woff2", "eot",
    "db", "sqlite", "sqlite3", "lock", "ipynb",
};

/// 严格模式下额外跳过的样式 / 标记类扩展名
static MARKUP_EXTENSIONS: phf::Set<&'static str> = phf::phf_set! {
    "css", "scss", "sass", "less", "html", "htm", "svg", "xml", "map",
};

/// 文件树兜底时拉取的源码扩展名
static SOURCE_EXTENSIONS: phf::Set<&'static str> = phf::phf_set! {
    "py", "js", "jsx", "ts", "tsx", "java", "c", "h", "cpp", "hpp", "cc",
    "cs", "go", "rb", "php", "rs", "kt", "swift", "scala", "sql", "sh",
};

/// 仓库代码来源
#[async_trait]
pub trait RepoSource: Send + Sync {
    async fn fetch(&self, repo_url: &str) -> Result<CodeBlob, FetchError>;
}

/// 获取相关选项
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_file_bytes: u64,
    pub exclude_markup: bool,
    pub max_api_files: usize,
    /// 临时目录的父目录，`None` 用系统临时目录
    pub scratch_root: Option<PathBuf>,
}

impl FetchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            exclude_markup: config.exclude_markup,
            max_api_files: config.max_api_files,
            scratch_root: config.scratch_dir.as_ref().map(PathBuf::from),
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 元数据查询的结论
#[derive(Debug, Default)]
struct MetadataProbe {
    default_branch: Option<String>,
    /// 明确的 404 / 401 / 403
    denial_status: Option<u16>,
}

/// GitHub 仓库获取服务
pub struct RepositoryFetcher {
    transport: Arc<dyn HttpTransport>,
    endpoints: GitHubEndpoints,
    options: FetchOptions,
}

impl RepositoryFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, options: FetchOptions) -> Self {
        Self {
            transport,
            endpoints: GitHubEndpoints::default(),
            options,
        }
    }

    async fn probe_metadata(&self, repo: &RepoCoordinates, attempts: &mut Vec<String>) -> MetadataProbe {
        let url = self.endpoints.repo_metadata(repo);
        match self.transport.get(&url).await {
            Ok(reply) if reply.is_success() => match reply.json::<RepoMetadata>() {
                Ok(meta) => MetadataProbe {
                    default_branch: meta.default_branch.filter(|b| !b.is_empty()),
                    denial_status: None,
                },
                Err(e) => {
                    attempts.push(format!("metadata: unreadable response ({})", e));
                    MetadataProbe::default()
                }
            },
            Ok(reply) => {
                attempts.push(format!("metadata: status {}", reply.status));
                MetadataProbe {
                    default_branch: None,
                    denial_status: matches!(reply.status, 401 | 403 | 404).then_some(reply.status),
                }
            }
            Err(e) => {
                attempts.push(format!("metadata: {}", e));
                MetadataProbe::default()
            }
        }
    }

    /// 下载并解压一个分支；返回 `Ok(None)` 表示应尝试下一个分支
    async fn try_archive(
        &self,
        repo: &RepoCoordinates,
        branch: &str,
        attempts: &mut Vec<String>,
    ) -> Option<CodeBlob> {
        let url = self.endpoints.branch_archive(repo, branch);
        let reply = match self.transport.get(&url).await {
            Ok(reply) => reply,
            Err(e) => {
                attempts.push(format!("{}: {}", branch, e));
                return None;
            }
        };

        if reply.status == 404 {
            debug!("分支 {} 不存在 ({})", branch, repo.slug());
            attempts.push(format!("{}: status 404", branch));
            return None;
        }
        if !reply.is_success() {
            attempts.push(format!(
                "{}: status {} ({})",
                branch,
                reply.status,
                reply.body_preview(80)
            ));
            return None;
        }

        let options = self.options.clone();
        let extracted = tokio::task::spawn_blocking(move || extract_archive(reply.body, &options)).await;
        match extracted {
            Ok(Ok((text, file_count))) if file_count > 0 => Some(CodeBlob {
                text,
                file_count,
                source: BlobSource::Archive {
                    branch: branch.to_string(),
                },
            }),
            Ok(Ok(_)) => {
                attempts.push(format!("{}: no matching files", branch));
                None
            }
            Ok(Err(e)) => {
                attempts.push(format!("{}: extraction failed ({})", branch, e));
                None
            }
            Err(e) => {
                attempts.push(format!("{}: extraction task failed ({})", branch, e));
                None
            }
        }
    }

    /// 文件树 API 兜底
    async fn try_tree_api(
        &self,
        repo: &RepoCoordinates,
        branch: &str,
        attempts: &mut Vec<String>,
    ) -> Option<CodeBlob> {
        let url = self.endpoints.tree(repo, branch);
        let listing = match self.transport.get(&url).await {
            Ok(reply) if reply.is_success() => match reply.json::<TreeListing>() {
                Ok(listing) => listing,
                Err(e) => {
                    attempts.push(format!("tree {}: unreadable response ({})", branch, e));
                    return None;
                }
            },
            Ok(reply) => {
                attempts.push(format!("tree {}: status {}", branch, reply.status));
                return None;
            }
            Err(e) => {
                attempts.push(format!("tree {}: {}", branch, e));
                return None;
            }
        };
        if listing.truncated {
            warn!("{} 的文件树被截断，只能拉取部分文件", repo.slug());
        }

        let mut text = String::new();
        let mut file_count = 0;
        let candidates = listing
            .tree
            .iter()
            .filter(|entry| entry.is_blob())
            .filter(|entry| extension_of(Path::new(&entry.path)).is_some_and(|ext| SOURCE_EXTENSIONS.contains(ext.as_str())))
            .filter(|entry| entry.size.unwrap_or(0) <= self.options.max_file_bytes)
            .take(self.options.max_api_files);

        for entry in candidates {
            let raw_url = self.endpoints.raw_file(repo, branch, &entry.path);
            match self.transport.get(&raw_url).await {
                Ok(reply) if reply.is_success() => {
                    if let Some(content) = decode_text(&reply.body) {
                        CodeBlob::push_file(&mut text, &entry.path, &content);
                        file_count += 1;
                    }
                }
                Ok(reply) => debug!("跳过 {} (status {})", entry.path, reply.status),
                Err(e) => debug!("跳过 {} ({})", entry.path, e),
            }
        }

        if file_count == 0 {
            attempts.push(format!("tree {}: no source files", branch));
            return None;
        }
        Some(CodeBlob {
            text,
            file_count,
            source: BlobSource::TreeApi {
                branch: branch.to_string(),
            },
        })
    }
}

#[async_trait]
impl RepoSource for RepositoryFetcher {
    async fn fetch(&self, repo_url: &str) -> Result<CodeBlob, FetchError> {
        let repo = RepoCoordinates::parse(repo_url).map_err(|_| FetchError::InvalidUrl {
            url: repo_url.to_string(),
        })?;
        let mut attempts = Vec::new();

        let probe = self.probe_metadata(&repo, &mut attempts).await;
        let branches = candidate_branches(probe.default_branch.as_deref());

        for branch in &branches {
            if let Some(blob) = self.try_archive(&repo, branch, &mut attempts).await {
                info!(
                    "✓ {} 获取成功: {} 个文件 ({})",
                    repo.slug(),
                    blob.file_count,
                    blob.source
                );
                return Ok(blob);
            }
        }

        warn!("{} 所有分支压缩包均不可用，尝试文件树 API", repo.slug());
        for branch in &branches {
            if let Some(blob) = self.try_tree_api(&repo, branch, &mut attempts).await {
                info!(
                    "✓ {} 通过文件树 API 获取: {} 个文件",
                    repo.slug(),
                    blob.file_count
                );
                return Ok(blob);
            }
        }

        Err(match probe.denial_status {
            Some(404) => FetchError::NotFound { repo: repo.slug() },
            Some(status) => FetchError::AccessDenied {
                repo: repo.slug(),
                status,
            },
            None => FetchError::Unavailable {
                repo: repo.slug(),
                detail: attempts.join("; "),
            },
        })
    }
}

/// 默认分支优先，其后 main、master，不重复
pub fn candidate_branches(default_branch: Option<&str>) -> Vec<String> {
    let mut branches: Vec<String> = Vec::with_capacity(3);
    for branch in default_branch.into_iter().chain(["main", "master"]) {
        if !branches.iter().any(|b| b == branch) {
            branches.push(branch.to_string());
        }
    }
    branches
}

/// 解压到临时目录并拼接文件；临时目录随 `TempDir` 释放而删除
fn extract_archive(bytes: Vec<u8>, options: &FetchOptions) -> std::io::Result<(String, usize)> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("repo-grader-");
    let scratch = match &options.scratch_root {
        Some(root) => builder.tempdir_in(root)?,
        None => builder.tempdir()?,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    archive
        .extract(scratch.path())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    collect_files(&archive_root(scratch.path())?, options)
}

/// GitHub 压缩包只有一个顶层目录（repo-branch/），以它为根
fn archive_root(dir: &Path) -> std::io::Result<PathBuf> {
    let entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    match entries.as_slice() {
        [only] if only.file_type()?.is_dir() => Ok(only.path()),
        _ => Ok(dir.to_path_buf()),
    }
}

/// 遍历目录，拼接所有符合条件的文件，返回 (文本, 文件数)
pub fn collect_files(root: &Path, options: &FetchOptions) -> std::io::Result<(String, usize)> {
    let mut text = String::new();
    let mut file_count = 0;

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(true)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("遍历出错，跳过: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if !is_included(path, options) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
        if size > options.max_file_bytes {
            debug!("文件过大，跳过: {} ({} bytes)", path.display(), size);
            continue;
        }

        let bytes = std::fs::read(path)?;
        let Some(content) = decode_text(&bytes) else {
            continue;
        };
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        CodeBlob::push_file(&mut text, &relative, &content);
        file_count += 1;
    }

    Ok((text, file_count))
}

fn is_included(path: &Path, options: &FetchOptions) -> bool {
    match extension_of(path) {
        Some(ext) if BINARY_EXTENSIONS.contains(ext.as_str()) => false,
        Some(ext) if options.exclude_markup && MARKUP_EXTENSIONS.contains(ext.as_str()) => false,
        _ => true,
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// 含 NUL 字节的当作二进制
fn decode_text(bytes: &[u8]) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }
    Some(String::from_utf8_lossy(bytes).into_owned())
}
