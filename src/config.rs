use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError};

/// 清洗模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeMode {
    /// 只把敏感词替换为 [REDACTED]
    Redact,
    /// 整行丢弃
    DropLine,
}

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 批处理 ---
    /// 每批学生数量
    pub batch_size: usize,
    /// 每批并发评分的工作槽位
    pub analyzer_slots: usize,
    /// 每批的总超时（秒）
    pub batch_timeout_secs: u64,
    // --- 评分 ---
    /// 单个分块的最大字符数
    pub max_chunk_size: usize,
    /// 及格线（百分比）
    pub passing_threshold: f64,
    /// 是否先做一轮分析再打分
    pub two_pass_analysis: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_max_tokens: u32,
    pub llm_max_retries: u32,
    pub llm_retry_backoff_ms: u64,
    /// 出现在错误信息里即视为内容安全拒绝的标记
    pub policy_markers: Vec<String>,
    // --- 仓库获取 ---
    pub github_token: Option<String>,
    pub http_timeout_secs: u64,
    /// 单文件大小上限（字节）
    pub max_file_bytes: u64,
    /// 是否排除样式 / 标记类文件
    pub exclude_markup: bool,
    /// API 兜底时最多拉取的文件数
    pub max_api_files: usize,
    /// 解压用临时目录的父目录，不设则用系统临时目录
    pub scratch_dir: Option<String>,
    // --- 内容清洗 ---
    pub sanitizer_denylist: Vec<String>,
    pub sanitize_mode: SanitizeMode,
    // --- 输出 ---
    pub results_path: String,
    pub error_log_path: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 4,
            analyzer_slots: 4,
            batch_timeout_secs: 120,
            max_chunk_size: 10_000,
            passing_threshold: 80.0,
            two_pass_analysis: true,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_max_tokens: 2048,
            llm_max_retries: 2,
            llm_retry_backoff_ms: 2000,
            policy_markers: vec![
                "content management policy".to_string(),
                "ResponsibleAIPolicyViolation".to_string(),
                "content_filter".to_string(),
                "content_policy_violation".to_string(),
            ],
            github_token: None,
            http_timeout_secs: 60,
            max_file_bytes: 1024 * 1024,
            exclude_markup: true,
            max_api_files: 200,
            scratch_dir: None,
            sanitizer_denylist: [
                "jailbreak", "hack", "exploit", "bypass", "token", "key", "password",
                "secret", "flag", "ctf", "admin", "root",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sanitize_mode: SanitizeMode::Redact,
            results_path: "results.json".to_string(),
            error_log_path: "results_errors.jsonl".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_overrides()
    }

    /// 默认值 → TOML 文件 → 环境变量
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }

    /// 从 TOML 文件读取配置，缺失字段使用默认值
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        toml::from_str(&content)
            .map_err(|e| AppError::file_parse_failed(path.display().to_string(), e))
    }

    fn with_env_overrides(self) -> AppResult<Self> {
        Ok(Self {
            batch_size: env_parse("BATCH_SIZE", self.batch_size)?,
            analyzer_slots: env_parse("ANALYZER_SLOTS", self.analyzer_slots)?,
            batch_timeout_secs: env_parse("BATCH_TIMEOUT_SECS", self.batch_timeout_secs)?,
            max_chunk_size: env_parse("MAX_CHUNK_SIZE", self.max_chunk_size)?,
            passing_threshold: env_parse("PASSING_THRESHOLD", self.passing_threshold)?,
            two_pass_analysis: env_parse("TWO_PASS_ANALYSIS", self.two_pass_analysis)?,
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(self.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            llm_max_tokens: env_parse("LLM_MAX_TOKENS", self.llm_max_tokens)?,
            llm_max_retries: env_parse("LLM_MAX_RETRIES", self.llm_max_retries)?,
            llm_retry_backoff_ms: env_parse("LLM_RETRY_BACKOFF_MS", self.llm_retry_backoff_ms)?,
            policy_markers: self.policy_markers,
            github_token: std::env::var("GITHUB_TOKEN").ok().or(self.github_token),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", self.http_timeout_secs)?,
            max_file_bytes: env_parse("MAX_FILE_BYTES", self.max_file_bytes)?,
            exclude_markup: env_parse("EXCLUDE_MARKUP", self.exclude_markup)?,
            max_api_files: env_parse("MAX_API_FILES", self.max_api_files)?,
            scratch_dir: std::env::var("SCRATCH_DIR").ok().or(self.scratch_dir),
            sanitizer_denylist: match std::env::var("SANITIZER_DENYLIST") {
                Ok(list) => split_list(&list),
                Err(_) => self.sanitizer_denylist,
            },
            sanitize_mode: self.sanitize_mode,
            results_path: std::env::var("RESULTS_PATH").unwrap_or(self.results_path),
            error_log_path: std::env::var("ERROR_LOG_PATH").unwrap_or(self.error_log_path),
            verbose_logging: env_parse("VERBOSE_LOGGING", self.verbose_logging)?,
        })
    }

    /// 校验配置取值
    pub fn validate(&self) -> AppResult<()> {
        if self.batch_size == 0 {
            return Err(AppError::invalid_config("batch_size", "must be at least 1"));
        }
        if self.analyzer_slots == 0 {
            return Err(AppError::invalid_config("analyzer_slots", "must be at least 1"));
        }
        if self.batch_timeout_secs == 0 {
            return Err(AppError::invalid_config("batch_timeout_secs", "must be at least 1"));
        }
        if self.max_chunk_size == 0 {
            return Err(AppError::invalid_config("max_chunk_size", "must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.passing_threshold) {
            return Err(AppError::invalid_config(
                "passing_threshold",
                format!("{} is outside 0..=100", self.passing_threshold),
            ));
        }
        Ok(())
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(var_name: &str, default: T) -> AppResult<T> {
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            AppError::Config(ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            })
        }),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
