//! 学生处理上下文
//!
//! 封装"我正在处理第几批的第几名学生"这一信息

use std::fmt::Display;

/// 学生处理上下文（仅用于日志）
#[derive(Debug, Clone)]
pub struct SubmissionCtx {
    /// 批次编号（从1开始）
    pub batch_number: usize,

    /// 学生在本批中的位置（从1开始）
    pub position: usize,

    pub student_name: String,
}

impl SubmissionCtx {
    pub fn new(batch_number: usize, position: usize, student_name: impl Into<String>) -> Self {
        Self {
            batch_number,
            position,
            student_name: student_name.into(),
        }
    }

    /// 不在批处理中运行时使用
    pub fn standalone(student_name: impl Into<String>) -> Self {
        Self::new(0, 0, student_name)
    }
}

impl Display for SubmissionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.batch_number == 0 {
            return write!(f, "[学生 {}]", self.student_name);
        }
        write!(
            f,
            "[批次 {} 学生#{} {}]",
            self.batch_number, self.position, self.student_name
        )
    }
}
