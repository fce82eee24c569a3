//! HTTP 传输 - 基础设施层
//!
//! 持有唯一的 HTTP 客户端，只暴露"GET 一个地址"的能力

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::{AppError, AppResult, FetchError};

/// 一次 GET 的结果（任何状态码都算成功返回）
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// 截取响应体开头，用于诊断信息
    pub fn body_preview(&self, max_len: usize) -> String {
        let text = String::from_utf8_lossy(&self.body);
        crate::utils::logging::truncate_text(text.trim(), max_len)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// GET 能力
///
/// 职责：
/// - 只负责把字节取回来
/// - 不认识仓库 / 分支
/// - 非 200 状态码交给调用方判断
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpReply, FetchError>;
}

/// 基于 reqwest 的实现
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// 创建新的传输层；配置了 token 时带上鉴权头
    pub fn new(config: &Config) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        if let Some(token) = config.github_token.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| AppError::invalid_config("github_token", e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| AppError::Other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpReply, FetchError> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::network(url, e))?
            .to_vec();
        tracing::debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpReply { status, body })
    }
}
