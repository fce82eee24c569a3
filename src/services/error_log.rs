//! 错误日志写入服务 - 业务能力层
//!
//! 只负责"把需要人工关注的记录追加到错误日志"，不关心流程

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::result::SubmissionResult;

/// 错误日志中的一行（JSON Lines）
#[derive(Debug, Serialize)]
struct ErrorLogLine<'a> {
    logged_at: String,
    name: &'a str,
    repo_url: &'a str,
    error: String,
}

/// 错误日志写入服务
///
/// 每条记录一行 JSON，只追加不改写，便于用 `jq` 之类的工具查询。
pub struct ErrorLogWriter {
    path: PathBuf,
}

impl ErrorLogWriter {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加需要关注的记录，返回写入条数
    pub fn append(&self, results: &[SubmissionResult]) -> AppResult<usize> {
        let flagged: Vec<&SubmissionResult> =
            results.iter().filter(|r| r.needs_attention()).collect();
        if flagged.is_empty() {
            return Ok(0);
        }

        let logged_at = chrono::Local::now().to_rfc3339();
        let mut buffer = String::new();
        for result in &flagged {
            let line = ErrorLogLine {
                logged_at: logged_at.clone(),
                name: &result.name,
                repo_url: &result.repo_url,
                error: result.feedback.join("; "),
            };
            buffer.push_str(&serde_json::to_string(&line)?);
            buffer.push('\n');
        }

        let path = self.path.display().to_string();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AppError::file_write_failed(path.clone(), e))?;
        file.write_all(buffer.as_bytes())
            .map_err(|e| AppError::file_write_failed(path, e))?;

        debug!("错误日志追加 {} 条 -> {}", flagged.len(), self.path.display());
        Ok(flagged.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::student::Student;

    #[test]
    fn only_flagged_results_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ErrorLogWriter::with_path(dir.path().join("errors.jsonl"));

        let bob = SubmissionResult::failed(
            &Student::new("Bob", "not-a-url"),
            "Invalid or missing GitHub URL.",
        );
        let mut alice = SubmissionResult::failed(&Student::new("Alice", "https://github.com/a/r"), "x");
        alice.repo_access = true;
        alice.grade = 12.0;

        assert_eq!(writer.append(&[alice, bob.clone()]).unwrap(), 1);
        assert_eq!(writer.append(&[bob]).unwrap(), 1);

        let content = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], "Bob");
        assert_eq!(lines[0]["error"], "Invalid or missing GitHub URL.");
    }

    #[test]
    fn feedback_is_joined() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ErrorLogWriter::with_path(dir.path().join("errors.jsonl"));
        let mut result = SubmissionResult::failed(&Student::new("Cy", "https://github.com/c/r"), "first");
        result.feedback.push("second".into());

        writer.append(&[result]).unwrap();
        let content = std::fs::read_to_string(writer.path()).unwrap();
        assert!(content.contains("\"error\":\"first; second\""));
    }
}
