use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 输入校验错误
    #[error("{0}")]
    Input(#[from] InputError),
    /// 文件操作错误
    #[error("{0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("{0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("{0}")]
    Other(String),
}

/// 输入错误：不发起任何网络请求，直接判零分
#[derive(Debug, Error)]
pub enum InputError {
    /// 仓库地址缺失
    #[error("Invalid or missing GitHub URL.")]
    MissingUrl,
    /// 仓库地址格式不对
    #[error("Invalid or missing GitHub URL.")]
    InvalidUrl { url: String },
    /// 评分标准为空
    #[error("Rubric is empty; nothing to grade against.")]
    EmptyRubric,
    /// 名单为空
    #[error("No students found in roster {path}")]
    EmptyRoster { path: String },
    /// 名单记录不合法
    #[error("Roster entry {index} is invalid: {reason}")]
    InvalidRosterEntry { index: usize, reason: String },
}

/// 仓库获取错误
#[derive(Debug, Error)]
pub enum FetchError {
    /// 仓库地址无法解析为 owner/repo
    #[error("not a repository URL: {url}")]
    InvalidUrl { url: String },
    /// 元数据接口明确返回 404，且所有分支都失败
    #[error("repository {repo} not found")]
    NotFound { repo: String },
    /// 元数据接口明确返回 401/403，且所有分支都失败
    #[error("access to repository {repo} denied (status {status})")]
    AccessDenied { repo: String, status: u16 },
    /// 传输层失败
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 所有分支及 API 兜底都失败
    #[error("repository {repo} unavailable: {detail}")]
    Unavailable { repo: String, detail: String },
}

/// LLM 服务错误（提供方一侧）
#[derive(Debug, Error)]
pub enum LlmError {
    /// 提供方内容安全过滤拒绝
    #[error("content filtered by provider (model: {model}): {message}")]
    ContentFiltered { model: String, message: String },
    /// 请求频率限制
    #[error("rate limited by provider (model: {model}): {message}")]
    RateLimited { model: String, message: String },
    /// API 调用失败（网络、5xx 等，可重试）
    #[error("LLM API call failed (model: {model}): {message}")]
    ApiCallFailed { model: String, message: String },
    /// 鉴权或请求参数被拒（401 / 403 / 400 等），重试无意义
    #[error("LLM API rejected the request (model: {model}): {message}")]
    Rejected { model: String, message: String },
    /// 返回内容为空
    #[error("LLM returned empty content (model: {model})")]
    EmptyContent { model: String },
    /// 请求构造失败
    #[error("invalid LLM request: {message}")]
    InvalidRequest { message: String },
}

impl LlmError {
    /// 是否值得重试（限流和网络类错误）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::ApiCallFailed { .. }
        )
    }
}

/// 评分错误
#[derive(Debug, Error)]
pub enum AssessError {
    /// 内容安全拒绝，可在分块粒度恢复
    #[error("content policy violation: {message}")]
    ContentPolicyViolation { message: String },
    /// 提供方错误（限流、网络、响应异常）
    #[error("provider error: {0}")]
    Provider(LlmError),
    /// 响应中提取不到任何分数
    #[error("could not extract any score from the model response (tried: {tried}); response began: {preview}")]
    Parse { tried: String, preview: String },
}

impl From<LlmError> for AssessError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ContentFiltered { message, .. } => {
                AssessError::ContentPolicyViolation { message }
            }
            other => AssessError::Provider(other),
        }
    }
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("file not found: {path}")]
    NotFound { path: String },
    /// 读取文件失败
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入文件失败
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 解析失败（JSON / TOML）
    #[error("failed to parse {path}: {source}")]
    ParseFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("environment variable {var_name}: value '{value}' is not a valid {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置值非法
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::File(FileError::ParseFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::File(FileError::ParseFailed {
            path: String::new(), // TOML错误通常不包含路径信息
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件解析错误
    pub fn file_parse_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ParseFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建配置值错误
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Config(ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }
}

impl FetchError {
    /// 创建网络错误
    pub fn network(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        FetchError::Network {
            url: url.into(),
            source: Box::new(source),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_filter_becomes_policy_violation() {
        let err: AssessError = LlmError::ContentFiltered {
            model: "gpt".into(),
            message: "ResponsibleAIPolicyViolation".into(),
        }
        .into();
        assert!(matches!(err, AssessError::ContentPolicyViolation { .. }));

        let err: AssessError = LlmError::RateLimited {
            model: "gpt".into(),
            message: "slow down".into(),
        }
        .into();
        assert!(matches!(err, AssessError::Provider(LlmError::RateLimited { .. })));
    }

    #[test]
    fn invalid_url_message_is_user_facing() {
        let err = InputError::InvalidUrl {
            url: "not-a-url".into(),
        };
        assert_eq!(err.to_string(), "Invalid or missing GitHub URL.");
    }

    #[test]
    fn only_transient_llm_errors_are_retryable() {
        assert!(LlmError::RateLimited {
            model: "m".into(),
            message: String::new()
        }
        .is_retryable());
        assert!(!LlmError::ContentFiltered {
            model: "m".into(),
            message: String::new()
        }
        .is_retryable());
        assert!(!LlmError::EmptyContent { model: "m".into() }.is_retryable());
        assert!(!LlmError::Rejected {
            model: "m".into(),
            message: "invalid_api_key".into()
        }
        .is_retryable());
    }
}
