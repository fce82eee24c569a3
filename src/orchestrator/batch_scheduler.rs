//! 批次调度器 - 编排层
//!
//! ## 职责
//!
//! 1. **分批**：按 `batch_size` 把名单切成有序批次，上一批交付后才开始下一批
//! 2. **并发控制**：每批用 Semaphore 限制同时运行的评分任务数
//! 3. **超时**：每批有一个总截止时间，过时未返回的任务不再等待
//! 4. **基数保证**：每名学生恰好一条记录，缺失的补超时记录，并按名单顺序返回

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::{Rubric, Student, SubmissionResult};
use crate::workflow::{Analyze, SubmissionCtx};

/// 调度参数
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub analyzer_slots: usize,
    pub timeout: Duration,
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            analyzer_slots: config.analyzer_slots.max(1),
            timeout: config.batch_timeout(),
        }
    }
}

/// 一批的处理结果，`results` 与输入顺序一致
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_number: usize,
    pub total_batches: usize,
    pub results: Vec<SubmissionResult>,
    /// 由调度器补的超时记录数
    pub timed_out: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    /// 正常出分的人数
    pub fn graded(&self) -> usize {
        self.results.iter().filter(|r| !r.needs_attention()).count()
    }
}

/// 批次调度器
pub struct BatchScheduler {
    analyzer: Arc<dyn Analyze>,
    settings: BatchSettings,
}

impl BatchScheduler {
    pub fn new(analyzer: Arc<dyn Analyze>, settings: BatchSettings) -> Self {
        Self { analyzer, settings }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    pub fn total_batches(&self, student_count: usize) -> usize {
        student_count.div_ceil(self.settings.batch_size.max(1))
    }

    /// 按顺序逐批产出结果
    ///
    /// 流是惰性的：消费方处理完一批（例如落盘）再拉取时，下一批才开始。
    pub fn run<'a>(
        &'a self,
        students: &'a [Student],
        rubric: Arc<Rubric>,
    ) -> impl Stream<Item = BatchReport> + 'a {
        let total_batches = self.total_batches(students.len());
        stream::iter(students.chunks(self.settings.batch_size.max(1)).enumerate()).then(
            move |(idx, batch)| {
                let rubric = rubric.clone();
                async move { self.run_batch(idx + 1, total_batches, batch, rubric).await }
            },
        )
    }

    /// 处理单个批次
    pub async fn run_batch(
        &self,
        batch_number: usize,
        total_batches: usize,
        students: &[Student],
        rubric: Arc<Rubric>,
    ) -> BatchReport {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let semaphore = Arc::new(Semaphore::new(self.settings.analyzer_slots.max(1)));
        // 本批唯一被并发写入的共享状态
        let slots: Arc<Mutex<Vec<Option<SubmissionResult>>>> =
            Arc::new(Mutex::new(vec![None; students.len()]));

        let mut handles = Vec::with_capacity(students.len());
        for (idx, student) in students.iter().enumerate() {
            let permit = match timeout_at(deadline, semaphore.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(e)) => {
                    error!("[批次 {}] 信号量已关闭: {}", batch_number, e);
                    break;
                }
                Err(_) => {
                    warn!(
                        "[批次 {}] ⏱️ 等待空闲槽位时超时，剩余 {} 名学生不再启动",
                        batch_number,
                        students.len() - idx
                    );
                    break;
                }
            };

            let ctx = SubmissionCtx::new(batch_number, idx + 1, student.name.clone());
            let analyzer = self.analyzer.clone();
            let student = student.clone();
            let rubric = rubric.clone();
            let slots = slots.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = analyzer.analyze(&student, &rubric, &ctx).await;
                store_result(&mut slots.lock().await, idx, result);
            }));
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match timeout_at(deadline, join_all(handles)).await {
            Ok(joined) => {
                for outcome in joined {
                    if let Err(e) = outcome {
                        error!("[批次 {}] 评分任务异常退出: {}", batch_number, e);
                    }
                }
            }
            Err(_) => {
                warn!(
                    "[批次 {}] ⏱️ 超过 {:?} 未全部完成，放弃未返回的任务",
                    batch_number, self.settings.timeout
                );
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }

        let collected = drain_slots(&mut slots.lock().await);
        let mut timed_out = 0;
        let results = students
            .iter()
            .zip(collected)
            .map(|(student, slot)| {
                slot.unwrap_or_else(|| {
                    timed_out += 1;
                    warn!("[批次 {}] ⏱️ {} 未按时返回，记为超时", batch_number, student.name);
                    SubmissionResult::timed_out(student)
                })
            })
            .collect::<Vec<_>>();

        let elapsed = started.elapsed();
        info!(
            "[批次 {}] 收集到 {} 条记录（超时 {}），耗时 {:.1}s",
            batch_number,
            results.len(),
            timed_out,
            elapsed.as_secs_f64()
        );

        BatchReport {
            batch_number,
            total_batches,
            results,
            timed_out,
            elapsed,
        }
    }
}

/// 超时后仍可能有任务写回；下标越界的写入直接丢弃
fn store_result(slots: &mut [Option<SubmissionResult>], idx: usize, result: SubmissionResult) {
    if let Some(slot) = slots.get_mut(idx) {
        *slot = Some(result);
    }
}

/// 取走已完成的结果，保留槽位长度，迟到的写入落在空槽里
fn drain_slots(slots: &mut [Option<SubmissionResult>]) -> Vec<Option<SubmissionResult>> {
    slots.iter_mut().map(Option::take).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::models::result::TIMEOUT_FEEDBACK;
    use crate::testing::SlowAnalyzer;

    fn roster(n: usize) -> Vec<Student> {
        (0..n)
            .map(|i| Student::new(format!("s{}", i), format!("https://github.com/s/{}", i)))
            .collect()
    }

    fn rubric() -> Arc<Rubric> {
        Arc::new(Rubric::RawText("grade it".into()))
    }

    fn scheduler(analyzer: Arc<SlowAnalyzer>, batch_size: usize, slots: usize, timeout_ms: u64) -> BatchScheduler {
        BatchScheduler::new(
            analyzer,
            BatchSettings {
                batch_size,
                analyzer_slots: slots,
                timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn every_student_gets_exactly_one_result_in_order() {
        let students = roster(7);
        let analyzer = Arc::new(SlowAnalyzer::new(Duration::from_millis(5)));
        let scheduler = scheduler(analyzer, 3, 2, 5_000);

        let reports: Vec<BatchReport> = scheduler.run(&students, rubric()).collect().await;
        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports.iter().map(|r| r.results.len()).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        assert!(reports.iter().all(|r| r.total_batches == 3));

        let names: Vec<String> = reports
            .iter()
            .flat_map(|r| r.results.iter().map(|res| res.name.clone()))
            .collect();
        let expected: Vec<String> = students.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_slots() {
        let students = roster(8);
        let analyzer = Arc::new(SlowAnalyzer::new(Duration::from_millis(20)));
        let scheduler = scheduler(analyzer.clone(), 8, 3, 5_000);

        let reports: Vec<BatchReport> = scheduler.run(&students, rubric()).collect().await;
        assert_eq!(reports[0].results.len(), 8);
        assert!(analyzer.peak.load(Ordering::SeqCst) <= 3);
        assert!(analyzer.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn hung_worker_becomes_timeout_record() {
        let students = roster(3);
        let analyzer = Arc::new(SlowAnalyzer::new(Duration::from_millis(5)).hang_on("s1"));
        let scheduler = scheduler(analyzer, 3, 3, 200);

        let report = scheduler.run_batch(1, 1, &students, rubric()).await;
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.timed_out, 1);

        let hung = &report.results[1];
        assert_eq!(hung.name, "s1");
        assert_eq!(hung.grade, 0.0);
        assert!(!hung.repo_access);
        assert_eq!(hung.feedback, vec![TIMEOUT_FEEDBACK]);
        assert!(report.results[0].repo_access);
        assert!(report.results[2].repo_access);
    }

    #[tokio::test]
    async fn slow_batch_does_not_cancel_next_batch() {
        let students = roster(4);
        let analyzer = Arc::new(SlowAnalyzer::new(Duration::from_millis(5)).hang_on("s0"));
        let scheduler = scheduler(analyzer, 2, 2, 150);

        let reports: Vec<BatchReport> = scheduler.run(&students, rubric()).collect().await;
        assert_eq!(reports[0].timed_out, 1);
        assert_eq!(reports[1].timed_out, 0);
        assert_eq!(reports[1].graded(), 2);
    }

    #[tokio::test]
    async fn empty_roster_yields_no_batches() {
        let analyzer = Arc::new(SlowAnalyzer::new(Duration::from_millis(1)));
        let scheduler = scheduler(analyzer, 4, 4, 1_000);
        let reports: Vec<BatchReport> = scheduler.run(&[], rubric()).collect().await;
        assert!(reports.is_empty());
    }

    #[test]
    fn late_write_after_drain_is_harmless() {
        let student = Student::new("late", "https://github.com/l/r");
        let mut slots = vec![None, None];
        store_result(&mut slots, 0, SubmissionResult::timed_out(&student));

        let drained = drain_slots(&mut slots);
        assert!(drained[0].is_some());
        assert_eq!(slots.len(), 2);

        store_result(&mut slots, 1, SubmissionResult::timed_out(&student));
        store_result(&mut slots, 5, SubmissionResult::timed_out(&student));
        assert!(slots[1].is_some());
    }

    /// 同步阻塞的评分任务，abort 无法打断
    struct BlockingAnalyzer {
        finished: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Analyze for BlockingAnalyzer {
        async fn analyze(&self, student: &Student, _rubric: &Rubric, _ctx: &SubmissionCtx) -> SubmissionResult {
            std::thread::sleep(Duration::from_millis(200));
            self.finished.store(true, Ordering::SeqCst);
            SubmissionResult::failed(student, "late")
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_finishing_after_deadline_is_recorded_as_timeout() {
        let analyzer = Arc::new(BlockingAnalyzer {
            finished: std::sync::atomic::AtomicBool::new(false),
        });
        let scheduler = BatchScheduler::new(
            analyzer.clone(),
            BatchSettings {
                batch_size: 1,
                analyzer_slots: 1,
                timeout: Duration::from_millis(50),
            },
        );

        let report = scheduler.run_batch(1, 1, &roster(1), rubric()).await;
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.results[0].feedback, vec![TIMEOUT_FEEDBACK]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(analyzer.finished.load(Ordering::SeqCst));
    }
}
