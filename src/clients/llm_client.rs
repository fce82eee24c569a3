//! LLM API 客户端
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, FinishReason,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LlmError;

/// 一次对话补全请求
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub temperature: f32,
}

/// 对话补全能力
///
/// 核心流程只依赖这一个最小契约：系统消息 + 用户消息 + 温度 → 文本。
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, request: ChatRequest<'_>) -> Result<String, LlmError>;
}

/// OpenAI 兼容接口的实现
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model_name: String,
    max_tokens: u32,
    policy_markers: Vec<String>,
}

impl OpenAiChat {
    /// 创建新的 LLM 客户端
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            max_tokens: config.llm_max_tokens,
            policy_markers: config.policy_markers.clone(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn model(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<String, LlmError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", request.user_prompt.len());

        let invalid = |e: async_openai::error::OpenAIError| LlmError::InvalidRequest {
            message: e.to_string(),
        };

        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.system_prompt)
                    .build()
                    .map_err(invalid)?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(request.user_prompt)
                    .build()
                    .map_err(invalid)?,
            ),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(invalid)?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            // Debug 输出里带着错误码（如 content_filter），一起参与分类
            classify_provider_error(
                &self.model_name,
                &format!("{} {:?}", e, e),
                &self.policy_markers,
            )
        })?;

        debug!("LLM API 调用成功");

        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        if matches!(choice.finish_reason, Some(FinishReason::ContentFilter)) {
            return Err(LlmError::ContentFiltered {
                model: self.model_name.clone(),
                message: "completion stopped by content filter".to_string(),
            });
        }

        let content = choice
            .message
            .content
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }
}

/// 鉴权失败、请求非法一类的错误特征
const REJECTION_MARKERS: &[&str] = &[
    "invalid_api_key",
    "incorrect api key",
    "authentication_error",
    "invalid_request_error",
    "permission_denied",
    "model_not_found",
    "401 unauthorized",
    "403 forbidden",
    "400 bad request",
];

/// 把提供方错误信息分类
///
/// 出现任一内容安全标记即为 `ContentFiltered`；限流字样为 `RateLimited`；
/// 鉴权 / 参数错误为 `Rejected`；其余为 `ApiCallFailed`。
pub fn classify_provider_error(model: &str, detail: &str, policy_markers: &[String]) -> LlmError {
    let lowered = detail.to_lowercase();
    let message = detail.to_string();

    if policy_markers
        .iter()
        .any(|marker| !marker.is_empty() && lowered.contains(&marker.to_lowercase()))
    {
        return LlmError::ContentFiltered {
            model: model.to_string(),
            message,
        };
    }

    if lowered.contains("rate limit")
        || lowered.contains("rate_limit")
        || lowered.contains("ratelimit")
        || lowered.contains("429")
        || lowered.contains("too many requests")
    {
        return LlmError::RateLimited {
            model: model.to_string(),
            message,
        };
    }

    if REJECTION_MARKERS.iter().any(|m| lowered.contains(m)) {
        return LlmError::Rejected {
            model: model.to_string(),
            message,
        };
    }

    LlmError::ApiCallFailed {
        model: model.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        Config::default().policy_markers
    }

    #[test]
    fn azure_policy_message_is_content_filter() {
        let err = classify_provider_error(
            "gpt",
            "The response was filtered due to the prompt triggering Azure OpenAI's content management policy.",
            &markers(),
        );
        assert!(matches!(err, LlmError::ContentFiltered { .. }));

        let err = classify_provider_error(
            "gpt",
            "ApiError { code: Some(\"ResponsibleAIPolicyViolation\") }",
            &markers(),
        );
        assert!(matches!(err, LlmError::ContentFiltered { .. }));
    }

    #[test]
    fn rate_limit_is_detected() {
        let err = classify_provider_error("gpt", "Rate limit reached for requests", &markers());
        assert!(matches!(err, LlmError::RateLimited { .. }));
    }

    #[test]
    fn auth_and_validation_failures_are_rejections() {
        let err = classify_provider_error(
            "gpt",
            "ApiError { message: \"Incorrect API key provided\", type: Some(\"invalid_request_error\"), code: Some(\"invalid_api_key\") }",
            &markers(),
        );
        assert!(matches!(err, LlmError::Rejected { .. }));
        assert!(!err.is_retryable());

        let err = classify_provider_error("gpt", "HTTP status client error (401 Unauthorized)", &markers());
        assert!(matches!(err, LlmError::Rejected { .. }));
    }

    #[test]
    fn anything_else_is_api_failure() {
        let err = classify_provider_error("gpt", "connection reset by peer", &markers());
        assert!(matches!(err, LlmError::ApiCallFailed { .. }));
    }

    #[test]
    fn markers_are_configurable() {
        let err = classify_provider_error("gpt", "blocked: SAFETY", &["safety".to_string()]);
        assert!(matches!(err, LlmError::ContentFiltered { .. }));
    }
}
