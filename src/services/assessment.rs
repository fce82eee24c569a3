//! 评分服务 - 业务能力层
//!
//! 只负责"一段代码 + 评分标准 → 一份评分"，不关心分块和学生

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clients::llm_client::{ChatProvider, ChatRequest};
use crate::config::Config;
use crate::error::{AssessError, LlmError};
use crate::models::assessment::Assessment;
use crate::models::rubric::Rubric;
use crate::services::score_parser::ScoreParserChain;

const ANALYSIS_TEMPERATURE: f32 = 0.3;
const SCORING_TEMPERATURE: f32 = 0.2;

/// 评分选项
#[derive(Debug, Clone)]
pub struct AssessmentOptions {
    pub two_pass: bool,
    pub passing_threshold: f64,
    /// 首次失败后的最大重试次数
    pub max_retries: u32,
    /// 第 n 次重试前等待 n × backoff
    pub retry_backoff: Duration,
}

impl AssessmentOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            two_pass: config.two_pass_analysis,
            passing_threshold: config.passing_threshold,
            max_retries: config.llm_max_retries,
            retry_backoff: Duration::from_millis(config.llm_retry_backoff_ms),
        }
    }
}

impl Default for AssessmentOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 评分服务
///
/// 职责：
/// - 拼提示词并调用模型（可选的分析轮 + 打分轮）
/// - 对限流、网络类错误做有限次重试；内容安全拒绝不重试
/// - 用解析链把回复变成条目得分
pub struct AssessmentClient {
    provider: Arc<dyn ChatProvider>,
    parsers: ScoreParserChain,
    options: AssessmentOptions,
}

impl AssessmentClient {
    pub fn new(provider: Arc<dyn ChatProvider>, options: AssessmentOptions) -> Self {
        Self {
            provider,
            parsers: ScoreParserChain::default(),
            options,
        }
    }

    pub fn with_parsers(mut self, parsers: ScoreParserChain) -> Self {
        self.parsers = parsers;
        self
    }

    /// 对一段代码评分
    pub async fn assess(&self, code: &str, rubric: &Rubric) -> Result<Assessment, AssessError> {
        let rubric_text = rubric.render_for_prompt();

        let scoring_input = if self.options.two_pass {
            let analysis = self
                .complete_with_retry(ChatRequest {
                    system_prompt: &analysis_system_prompt(&rubric_text),
                    user_prompt: &analysis_user_prompt(code),
                    temperature: ANALYSIS_TEMPERATURE,
                })
                .await?;
            debug!("分析轮完成，{} 字符", analysis.len());
            ScoringInput::Analysis(analysis)
        } else {
            ScoringInput::Code(code)
        };

        let response = self
            .complete_with_retry(ChatRequest {
                system_prompt: &scoring_system_prompt(&rubric_text),
                user_prompt: &scoring_input.user_prompt(),
                temperature: SCORING_TEMPERATURE,
            })
            .await?;

        let parsed = self.parsers.parse(&response, rubric)?;
        info!(
            "✓ 评分解析完成 (模型: {}, 策略: {}, {} 个条目)",
            self.provider.model(),
            parsed.strategy,
            parsed.scores.len()
        );
        Ok(Assessment::from_scores(
            parsed.scores,
            rubric,
            self.options.passing_threshold,
        ))
    }

    async fn complete_with_retry(&self, request: ChatRequest<'_>) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.provider.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    attempt += 1;
                    let wait = self.options.retry_backoff * attempt;
                    warn!(
                        "⚠️  模型 {} 调用失败，{}ms 后第 {} 次重试: {}",
                        self.provider.model(),
                        wait.as_millis(),
                        attempt,
                        e
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

enum ScoringInput<'a> {
    Analysis(String),
    Code(&'a str),
}

impl ScoringInput<'_> {
    fn user_prompt(&self) -> String {
        match self {
            ScoringInput::Analysis(analysis) => format!(
                "Score the submission using this analysis of its code:\n\nAnalysis:\n{}\n\nGive a score for every criterion.",
                analysis
            ),
            ScoringInput::Code(code) => format!(
                "Score this code:\n\n{}\n\nGive a score for every criterion.",
                code
            ),
        }
    }
}

fn analysis_system_prompt(rubric_text: &str) -> String {
    format!(
        "You are an experienced reviewer of student code. Study the code against these criteria:\n\n\
         {}\n\n\
         For every criterion, examine the code closely, weigh each scoring level, \
         and quote concrete examples from the files. A separate step will turn your analysis into scores.",
        rubric_text
    )
}

fn analysis_user_prompt(code: &str) -> String {
    format!(
        "Analyze the following code against the criteria. Each file starts with a `# === FILE: <path> ===` line.\n\n{}\n\n\
         Cite specific files and snippets for each criterion.",
        code
    )
}

fn scoring_system_prompt(rubric_text: &str) -> String {
    format!(
        "You grade student code against this rubric:\n\n\
         {}\n\n\
         Keep every score inside the range defined for its criterion and make it agree with the level descriptions.\n\
         Reply with one block per criterion, exactly in this layout:\n\n\
         CRITERION: <criterion name>\n\
         SCORE: <X> out of <Y> points\n\
         LEVEL: <matched level description>\n\
         JUSTIFICATION: <evidence from the code>\n",
        rubric_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rubric::Criterion;
    use crate::testing::ScriptedChat;

    fn rubric() -> Rubric {
        Rubric::Structured(vec![
            Criterion::new("Code Quality", 10.0),
            Criterion::new("Testing", 10.0),
        ])
    }

    fn options(two_pass: bool) -> AssessmentOptions {
        AssessmentOptions {
            two_pass,
            passing_threshold: 80.0,
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    const SCORES: &str = "CRITERION: Code Quality\nSCORE: 9 out of 10 points\nJUSTIFICATION: tidy\n\n\
                          CRITERION: Testing\nSCORE: 7 out of 10 points\nJUSTIFICATION: decent";

    #[tokio::test]
    async fn two_pass_uses_analysis_then_scoring() {
        let chat = Arc::new(
            ScriptedChat::new()
                .reply(Ok("The code is tidy.".into()))
                .reply(Ok(SCORES.into())),
        );
        let client = AssessmentClient::new(chat.clone(), options(true));

        let assessment = client.assess("print(1)", &rubric()).await.unwrap();
        assert_eq!(assessment.total_points, 16.0);
        assert_eq!(assessment.max_points, 20.0);
        assert_eq!(assessment.percentage, 80.0);
        assert!(assessment.passing);

        let calls = chat.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].temperature, ANALYSIS_TEMPERATURE);
        assert!(calls[0].user_prompt.contains("print(1)"));
        assert_eq!(calls[1].temperature, SCORING_TEMPERATURE);
        assert!(calls[1].user_prompt.contains("The code is tidy."));
        assert!(calls[1].system_prompt.contains("Code Quality [Maximum 10 points]"));
    }

    #[tokio::test]
    async fn single_pass_sends_code_to_scoring() {
        let chat = Arc::new(ScriptedChat::new().reply(Ok(SCORES.into())));
        let client = AssessmentClient::new(chat.clone(), options(false));

        client.assess("fn main() {}", &rubric()).await.unwrap();
        let calls = chat.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].user_prompt.contains("fn main() {}"));
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let chat = Arc::new(
            ScriptedChat::new()
                .reply(Err(LlmError::RateLimited {
                    model: "m".into(),
                    message: "429".into(),
                }))
                .reply(Ok(SCORES.into())),
        );
        let client = AssessmentClient::new(chat.clone(), options(false));

        let assessment = client.assess("x", &rubric()).await.unwrap();
        assert_eq!(assessment.total_points, 16.0);
        assert_eq!(chat.calls().len(), 2);
    }

    #[tokio::test]
    async fn policy_violation_is_typed_and_not_retried() {
        let chat = Arc::new(ScriptedChat::new().reply(Err(LlmError::ContentFiltered {
            model: "m".into(),
            message: "ResponsibleAIPolicyViolation".into(),
        })));
        let client = AssessmentClient::new(chat.clone(), options(true));

        let err = client.assess("x", &rubric()).await.unwrap_err();
        assert!(matches!(err, AssessError::ContentPolicyViolation { .. }));
        assert_eq!(chat.calls().len(), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let failing = || {
            Err(LlmError::ApiCallFailed {
                model: "m".into(),
                message: "503".into(),
            })
        };
        let chat = Arc::new(
            ScriptedChat::new()
                .reply(failing())
                .reply(failing())
                .reply(failing())
                .reply(Ok(SCORES.into())),
        );
        let client = AssessmentClient::new(chat.clone(), options(false));

        let err = client.assess("x", &rubric()).await.unwrap_err();
        assert!(matches!(err, AssessError::Provider(LlmError::ApiCallFailed { .. })));
        assert_eq!(chat.calls().len(), 3);
    }

    #[tokio::test]
    async fn rejected_requests_fail_fast() {
        let chat = Arc::new(
            ScriptedChat::new()
                .reply(Err(LlmError::Rejected {
                    model: "m".into(),
                    message: "invalid_api_key".into(),
                }))
                .reply(Ok(SCORES.into())),
        );
        let client = AssessmentClient::new(chat.clone(), options(false));

        let err = client.assess("x", &rubric()).await.unwrap_err();
        assert!(matches!(err, AssessError::Provider(LlmError::Rejected { .. })));
        assert_eq!(chat.calls().len(), 1);
    }

    #[tokio::test]
    async fn unparseable_reply_is_a_parse_error() {
        let chat = Arc::new(ScriptedChat::new().reply(Ok("Looks great!".into())));
        let client = AssessmentClient::new(chat, options(false));

        let err = client.assess("x", &rubric()).await.unwrap_err();
        assert!(matches!(err, AssessError::Parse { .. }));
    }
}
