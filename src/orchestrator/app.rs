//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：按配置组装 传输层 → 获取 / 清洗 / 评分 → 流程 → 调度 → 汇总
//! 2. **输入加载**：名单与评分标准，加载失败是唯一的致命错误
//! 3. **逐批运行**：每批结果先落盘再开始下一批
//! 4. **全局统计**

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{error, info};

use crate::clients::OpenAiChat;
use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::ReqwestTransport;
use crate::models::{load_roster, load_rubric, Rubric, Student};
use crate::orchestrator::batch_scheduler::{BatchReport, BatchScheduler, BatchSettings};
use crate::orchestrator::result_aggregator::ResultAggregator;
use crate::services::{
    AssessmentClient, AssessmentOptions, ContentSanitizer, FetchOptions, RepositoryFetcher,
};
use crate::utils::logging::{
    log_batch_complete, log_batch_start, log_roster_loaded, log_startup, print_final_stats,
};
use crate::workflow::SubmissionAnalyzer;

/// 输入文件位置
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub roster: PathBuf,
    pub rubric: PathBuf,
}

/// 整次运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub batches: usize,
    /// 正常出分
    pub graded: usize,
    /// 零分或无法访问仓库（含超时）
    pub failed: usize,
    pub timed_out: usize,
    /// 落盘失败的批次数
    pub append_failures: usize,
}

impl RunStats {
    fn record(&mut self, report: &BatchReport) {
        let graded = report.graded();
        self.batches += 1;
        self.total += report.results.len();
        self.graded += graded;
        self.failed += report.results.len() - graded;
        self.timed_out += report.timed_out;
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    paths: RunPaths,
    scheduler: BatchScheduler,
    aggregator: ResultAggregator,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config, paths: RunPaths) -> AppResult<Self> {
        config.validate()?;
        log_startup(&config);

        let transport = Arc::new(ReqwestTransport::new(&config)?);
        let fetcher = RepositoryFetcher::new(transport, FetchOptions::from_config(&config));
        let sanitizer = ContentSanitizer::new(&config.sanitizer_denylist, config.sanitize_mode)?;
        let assessor = AssessmentClient::new(
            Arc::new(OpenAiChat::new(&config)),
            AssessmentOptions::from_config(&config),
        );
        let analyzer = SubmissionAnalyzer::new(
            Arc::new(fetcher),
            sanitizer,
            assessor,
            config.max_chunk_size,
            config.passing_threshold,
        );

        let scheduler = BatchScheduler::new(Arc::new(analyzer), BatchSettings::from_config(&config));
        let aggregator = ResultAggregator::new(&config.results_path, &config.error_log_path);

        Ok(Self {
            config,
            paths,
            scheduler,
            aggregator,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> AppResult<RunStats> {
        info!("\n📁 正在加载名单与评分标准...");
        let students = load_roster(&self.paths.roster).await?;
        let rubric = load_rubric(&self.paths.rubric).await?;
        log_roster_loaded(
            students.len(),
            self.config.batch_size,
            self.config.analyzer_slots,
        );

        let stats = run_pipeline(&self.scheduler, &self.aggregator, &students, Arc::new(rubric)).await;

        print_final_stats(
            &stats,
            self.aggregator.report_path(),
            self.aggregator.error_log_path(),
        );
        Ok(stats)
    }
}

/// 逐批评分并落盘
///
/// 落盘失败只记录日志，不中断后续批次。
pub async fn run_pipeline(
    scheduler: &BatchScheduler,
    aggregator: &ResultAggregator,
    students: &[Student],
    rubric: Arc<Rubric>,
) -> RunStats {
    let mut stats = RunStats::default();
    let batch_size = scheduler.settings().batch_size;
    let total_batches = scheduler.total_batches(students.len());

    if total_batches > 0 {
        log_batch_start(1, total_batches, 1, batch_size.min(students.len()), students.len());
    }

    let mut reports = std::pin::pin!(scheduler.run(students, rubric));
    while let Some(report) = reports.next().await {
        stats.record(&report);
        log_batch_complete(&report);

        if let Err(e) = aggregator.append(&report.results) {
            error!("[批次 {}] ❌ 结果落盘失败: {}", report.batch_number, e);
            stats.append_failures += 1;
        }

        if report.batch_number < total_batches {
            let start = report.batch_number * batch_size;
            log_batch_start(
                report.batch_number + 1,
                total_batches,
                start + 1,
                (start + batch_size).min(students.len()),
                students.len(),
            );
        }
    }

    stats
}
