use serde::{Deserialize, Serialize};

use crate::models::assessment::CriterionScore;
use crate::models::student::Student;

/// 超时或工作任务异常退出时的反馈
pub const TIMEOUT_FEEDBACK: &str = "Analyzer timed out or failed.";

/// 每名学生唯一的一条评分记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub name: String,
    pub repo_url: String,
    pub grade: f64,
    pub feedback: Vec<String>,
    #[serde(default)]
    pub rubric_breakdown: Vec<CriterionScore>,
    pub repo_access: bool,
    #[serde(default)]
    pub max_points: f64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub passing: bool,
}

impl SubmissionResult {
    /// 零分记录，附带原因
    pub fn failed(student: &Student, reason: impl Into<String>) -> Self {
        Self {
            name: student.name.clone(),
            repo_url: student.repo_url.clone(),
            grade: 0.0,
            feedback: vec![reason.into()],
            rubric_breakdown: Vec::new(),
            repo_access: false,
            max_points: 0.0,
            percentage: 0.0,
            passing: false,
        }
    }

    /// 调度器为没有按时返回的学生补的记录
    pub fn timed_out(student: &Student) -> Self {
        Self::failed(student, TIMEOUT_FEEDBACK)
    }

    /// 是否需要写进错误日志
    pub fn needs_attention(&self) -> bool {
        !self.repo_access || self.grade == 0.0
    }

    /// 报告合并时的身份键
    pub fn identity(&self) -> (&str, &str) {
        (&self.name, &self.repo_url)
    }
}
