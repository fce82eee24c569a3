//! # Repo Grader
//!
//! 按评分标准，用 LLM 批量给学生 GitHub 仓库打分
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure / Clients）
//! - `infrastructure/` - `HttpTransport`，所有 HTTP GET 的唯一出口
//! - `clients/` - GitHub 地址与接口拼装、LLM 对话补全（`ChatProvider`）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个仓库 / 单段代码
//! - `RepositoryFetcher` - 仓库 → 带文件标记的代码文本
//! - `ContentSanitizer` - 清洗敏感字眼、分块
//! - `AssessmentClient` - 代码 + 评分标准 → 评分（含解析链）
//! - `ErrorLogWriter` - 写错误日志能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一名学生"的完整处理流程
//! - `SubmissionCtx` - 上下文封装（批次 + 序号 + 姓名）
//! - `SubmissionAnalyzer` - 流程编排（校验 → 获取 → 分块评分 → 汇总）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_scheduler` - 分批、限并发、超时、基数保证
//! - `orchestrator/result_aggregator` - 批次之间合并报告
//! - `orchestrator/app` - 组装与运行
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{Rubric, Student, SubmissionResult};
pub use orchestrator::{run_pipeline, App, RunPaths, RunStats};
pub use workflow::{Analyze, SubmissionAnalyzer, SubmissionCtx};
