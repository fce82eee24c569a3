//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 按配置组装各层组件
//! - 加载名单与评分标准
//! - 逐批运行并输出全局统计
//!
//! ### `batch_scheduler` - 批次调度器
//! - 分批、限并发（Semaphore）、每批超时
//! - 保证每名学生恰好一条记录
//!
//! ### `result_aggregator` - 结果汇总器
//! - 批次之间合并报告、写错误日志
//!
//! ## 层次关系
//!
//! ```text
//! app (处理整份名单)
//!     ↓
//! batch_scheduler (处理 Vec<Student>) → result_aggregator
//!     ↓
//! workflow::SubmissionAnalyzer (处理单名学生)
//!     ↓
//! services (能力层：fetch / sanitize / assess / error log)
//!     ↓
//! clients + infrastructure (GitHub 地址、LLM、HTTP 传输)
//! ```

pub mod app;
pub mod batch_scheduler;
pub mod result_aggregator;

pub use app::{run_pipeline, App, RunPaths, RunStats};
pub use batch_scheduler::{BatchReport, BatchScheduler, BatchSettings};
pub use result_aggregator::{AppendSummary, ResultAggregator};
