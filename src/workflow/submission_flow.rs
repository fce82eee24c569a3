//! 学生处理流程 - 流程层
//!
//! 核心职责：定义"一名学生"的完整处理流程
//!
//! 流程顺序：
//! 1. 地址校验（不发任何请求）
//! 2. 获取仓库代码
//! 3. 分块 → 每块清洗 → 评分
//! 4. 汇总分数与反馈
//!
//! 任何失败都折叠进反馈，`analyze` 永远返回一条记录。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::clients::github_client::RepoCoordinates;
use crate::error::{AssessError, InputError};
use crate::models::assessment::{percentage, Assessment, CriterionScore};
use crate::models::rubric::{format_points, Rubric};
use crate::models::{Student, SubmissionResult};
use crate::services::sanitizer::chunk;
use crate::services::{AssessmentClient, ContentSanitizer, RepoSource};
use crate::utils::logging::truncate_text;
use crate::workflow::submission_ctx::SubmissionCtx;

/// 单名学生的评分能力
#[async_trait]
pub trait Analyze: Send + Sync {
    async fn analyze(&self, student: &Student, rubric: &Rubric, ctx: &SubmissionCtx) -> SubmissionResult;
}

/// 处理阶段（仅用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    UrlValidation,
    RepoFetch,
    Chunking,
    Assessment,
    Aggregation,
    Done,
    Failed,
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AnalysisStage::UrlValidation => "地址校验",
            AnalysisStage::RepoFetch => "获取仓库",
            AnalysisStage::Chunking => "分块",
            AnalysisStage::Assessment => "评分",
            AnalysisStage::Aggregation => "汇总",
            AnalysisStage::Done => "完成",
            AnalysisStage::Failed => "失败",
        };
        f.write_str(label)
    }
}

/// 分块评分的累计结果
#[derive(Default)]
struct ChunkTally {
    total_points: f64,
    max_points: f64,
    scored_chunks: usize,
    breakdown: Vec<CriterionScore>,
    notes: Vec<String>,
}

impl ChunkTally {
    fn add(&mut self, chunk_number: usize, chunk_count: usize, assessment: Assessment) {
        self.total_points += assessment.total_points;
        self.max_points += assessment.max_points;
        self.scored_chunks += 1;

        if chunk_count > 1 {
            self.notes.push(format!(
                "Chunk {} of {}: {}/{} ({}%).",
                chunk_number,
                chunk_count,
                format_points(assessment.total_points),
                format_points(assessment.max_points),
                format_points(assessment.percentage)
            ));
        }
        for score in &assessment.criteria_scores {
            if !score.justification.is_empty() {
                self.notes.push(format!(
                    "{} ({}/{}): {}",
                    score.criterion,
                    format_points(score.points),
                    format_points(score.max_points),
                    score.justification
                ));
            }
        }
        self.breakdown.extend(assessment.criteria_scores);
    }
}

/// 学生处理流程
///
/// - 编排 获取 → 清洗 → 评分 → 汇总
/// - 不持有并发资源，由调度器决定何时运行
pub struct SubmissionAnalyzer {
    fetcher: Arc<dyn RepoSource>,
    sanitizer: ContentSanitizer,
    assessor: AssessmentClient,
    max_chunk_size: usize,
    passing_threshold: f64,
}

impl SubmissionAnalyzer {
    pub fn new(
        fetcher: Arc<dyn RepoSource>,
        sanitizer: ContentSanitizer,
        assessor: AssessmentClient,
        max_chunk_size: usize,
        passing_threshold: f64,
    ) -> Self {
        Self {
            fetcher,
            sanitizer,
            assessor,
            max_chunk_size,
            passing_threshold,
        }
    }

    pub async fn run(&self, student: &Student, rubric: &Rubric, ctx: &SubmissionCtx) -> SubmissionResult {
        debug!("{} 阶段: {}", ctx, AnalysisStage::UrlValidation);
        if let Err(e) = RepoCoordinates::parse(&student.repo_url) {
            warn!("{} ❌ 仓库地址无效: '{}'", ctx, student.repo_url);
            return SubmissionResult::failed(student, e.to_string());
        }
        if rubric.is_empty() {
            warn!("{} ❌ 评分标准为空", ctx);
            return SubmissionResult::failed(student, InputError::EmptyRubric.to_string());
        }

        debug!("{} 阶段: {}", ctx, AnalysisStage::RepoFetch);
        let blob = match self.fetcher.fetch(&student.repo_url).await {
            Ok(blob) => blob,
            Err(e) => {
                error!("{} ❌ 仓库获取失败: {}", ctx, e);
                debug!("{} 阶段: {}", ctx, AnalysisStage::Failed);
                return SubmissionResult::failed(student, format!("Repo could not be analyzed: {}", e));
            }
        };

        let mut result = SubmissionResult {
            repo_access: true,
            feedback: Vec::new(),
            ..SubmissionResult::failed(student, "")
        };

        if blob.is_empty() {
            warn!("{} ⚠️  仓库中没有可评分的源码", ctx);
            result
                .feedback
                .push("Repository contains no gradable source files.".to_string());
            return result;
        }

        debug!("{} 阶段: {}", ctx, AnalysisStage::Chunking);
        let chunks = chunk(&blob.text, self.max_chunk_size);
        let chunk_count = chunks.len();
        info!(
            "{} 📦 {} 个文件 ({})，分为 {} 块",
            ctx, blob.file_count, blob.source, chunk_count
        );

        debug!("{} 阶段: {}", ctx, AnalysisStage::Assessment);
        let mut tally = ChunkTally::default();
        for code_chunk in &chunks {
            let number = code_chunk.index + 1;
            let cleaned = self.sanitizer.sanitize(&code_chunk.text);

            match self.assessor.assess(&cleaned, rubric).await {
                Ok(assessment) => {
                    info!(
                        "{} ✓ 第 {}/{} 块: {}/{}",
                        ctx,
                        number,
                        chunk_count,
                        format_points(assessment.total_points),
                        format_points(assessment.max_points)
                    );
                    tally.add(number, chunk_count, assessment);
                }
                Err(AssessError::ContentPolicyViolation { message }) => {
                    warn!(
                        "{} ⚠️  第 {} 块被内容安全策略拒绝: {}",
                        ctx,
                        number,
                        truncate_text(&message, 80)
                    );
                    tally.notes.push(format!(
                        "Chunk {} could not be assessed due to content policy violation. Please review this code manually.",
                        number
                    ));
                }
                Err(e) => {
                    error!("{} ❌ 第 {} 块评分失败，停止后续分块: {}", ctx, number, e);
                    let message = if chunk_count > 1 {
                        format!("Error during AI assessment of chunk {}: {}", number, e)
                    } else {
                        format!("Error during AI assessment: {}", e)
                    };
                    tally.notes.push(message);
                    break;
                }
            }
        }

        debug!("{} 阶段: {}", ctx, AnalysisStage::Aggregation);
        let pct = percentage(tally.total_points, tally.max_points);
        result.grade = tally.total_points;
        result.max_points = tally.max_points;
        result.percentage = pct;
        result.passing = tally.scored_chunks > 0 && pct >= self.passing_threshold;
        result.rubric_breakdown = tally.breakdown;

        if tally.scored_chunks > 0 {
            result.feedback.push(format!(
                "Total Score: {}/{} ({}%)",
                format_points(tally.total_points),
                format_points(tally.max_points),
                format_points(pct)
            ));
            if tally.notes.is_empty() {
                result.feedback.push("Assessment complete.".to_string());
            }
        }
        result.feedback.extend(tally.notes);

        debug!("{} 阶段: {}", ctx, AnalysisStage::Done);
        info!(
            "{} ✅ 总分 {}/{} ({}%)",
            ctx,
            format_points(result.grade),
            format_points(result.max_points),
            format_points(result.percentage)
        );
        result
    }
}

#[async_trait]
impl Analyze for SubmissionAnalyzer {
    async fn analyze(&self, student: &Student, rubric: &Rubric, ctx: &SubmissionCtx) -> SubmissionResult {
        self.run(student, rubric, ctx).await
    }
}
