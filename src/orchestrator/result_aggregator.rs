//! 结果汇总器 - 编排层
//!
//! 只在批次之间单线程调用：把一批结果合并进累计报告（JSON 数组），
//! 需要关注的记录另写一份错误日志。

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::SubmissionResult;
use crate::services::ErrorLogWriter;

/// 一次追加的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    /// 新增的记录
    pub added: usize,
    /// 按 (name, repo_url) 覆盖的旧记录
    pub replaced: usize,
    /// 写进错误日志的记录
    pub flagged: usize,
    /// 追加后报告中的记录总数
    pub total: usize,
}

/// 结果汇总器
pub struct ResultAggregator {
    report_path: PathBuf,
    error_log: ErrorLogWriter,
}

impl ResultAggregator {
    pub fn new(report_path: impl Into<PathBuf>, error_log_path: impl Into<PathBuf>) -> Self {
        Self {
            report_path: report_path.into(),
            error_log: ErrorLogWriter::with_path(error_log_path),
        }
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn error_log_path(&self) -> &Path {
        self.error_log.path()
    }

    /// 读取当前报告；文件不存在或为空时返回空列表
    pub fn load(&self) -> AppResult<Vec<SubmissionResult>> {
        let path = self.report_path.display().to_string();
        let content = match std::fs::read_to_string(&self.report_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::file_read_failed(path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| AppError::file_parse_failed(path, e))
    }

    /// 合并一批结果并落盘
    ///
    /// 同一 (name, repo_url) 的旧记录被新记录替换，其余保留原有顺序，新记录追加在末尾。
    pub fn append(&self, results: &[SubmissionResult]) -> AppResult<AppendSummary> {
        let mut report = self.load()?;
        let mut summary = AppendSummary::default();

        for result in results {
            match report.iter().position(|r| r.identity() == result.identity()) {
                Some(idx) => {
                    report[idx] = result.clone();
                    summary.replaced += 1;
                }
                None => {
                    report.push(result.clone());
                    summary.added += 1;
                }
            }
        }
        summary.total = report.len();

        self.write_report(&report)?;
        summary.flagged = self.error_log.append(results)?;

        info!(
            "💾 报告已更新: 新增 {}，覆盖 {}，共 {} 条（错误日志 +{}）",
            summary.added, summary.replaced, summary.total, summary.flagged
        );
        Ok(summary)
    }

    /// 先写临时文件再改名，中途失败不会留下半截报告
    fn write_report(&self, report: &[SubmissionResult]) -> AppResult<()> {
        let path = self.report_path.display().to_string();
        let dir = self
            .report_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let json = serde_json::to_string_pretty(report)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| AppError::file_write_failed(path.clone(), e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| AppError::file_write_failed(path.clone(), e))?;
        tmp.persist(&self.report_path)
            .map_err(|e| AppError::file_write_failed(path, e.error))?;

        debug!("报告写入 {}", self.report_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Student;

    fn graded(name: &str, grade: f64) -> SubmissionResult {
        SubmissionResult {
            grade,
            repo_access: true,
            feedback: vec!["Assessment complete.".into()],
            ..SubmissionResult::failed(
                &Student::new(name, format!("https://github.com/{}/r", name)),
                "",
            )
        }
    }

    fn aggregator(dir: &tempfile::TempDir) -> ResultAggregator {
        ResultAggregator::new(dir.path().join("results.json"), dir.path().join("errors.jsonl"))
    }

    #[test]
    fn disjoint_appends_yield_union() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir);

        agg.append(&[graded("a", 5.0), graded("b", 6.0)]).unwrap();
        let summary = agg.append(&[graded("c", 7.0)]).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.total, 3);

        let names: Vec<String> = agg.load().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn same_identity_is_replaced_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir);

        agg.append(&[graded("a", 5.0)]).unwrap();
        let summary = agg.append(&[graded("a", 9.0)]).unwrap();
        assert_eq!(summary.replaced, 1);

        let report = agg.load().unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].grade, 9.0);
    }

    #[test]
    fn zero_grades_go_to_error_log() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir);

        let bob = SubmissionResult::failed(&Student::new("Bob", "not-a-url"), "Invalid or missing GitHub URL.");
        let summary = agg.append(&[graded("a", 5.0), bob]).unwrap();
        assert_eq!(summary.flagged, 1);

        let log = std::fs::read_to_string(agg.error_log_path()).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("\"name\":\"Bob\""));
    }

    #[test]
    fn missing_report_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(aggregator(&dir).load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let agg = aggregator(&dir);
        std::fs::write(agg.report_path(), "{not json").unwrap();
        assert!(matches!(agg.append(&[graded("a", 1.0)]), Err(AppError::File(_))));
    }
}
