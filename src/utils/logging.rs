/// 日志工具模块
///
/// 提供运行级横幅和统计输出的辅助函数
use std::path::Path;

use tracing::info;

use crate::config::Config;
use crate::orchestrator::{BatchReport, RunStats};

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量仓库评分模式");
    info!("🤖 模型: {} ({})", config.llm_model_name, config.llm_api_base_url);
    info!(
        "📊 每批 {} 名 / 并发 {} / 超时 {}s",
        config.batch_size, config.analyzer_slots, config.batch_timeout_secs
    );
    info!("{}", "=".repeat(60));
}

/// 记录名单加载信息
pub fn log_roster_loaded(total: usize, batch_size: usize, analyzer_slots: usize) {
    info!("✓ 名单中共有 {} 名学生", total);
    info!("📋 将以每批 {} 名、最多 {} 个并发的方式处理", batch_size, analyzer_slots);
    info!("💡 每批结果落盘后再开始下一批\n");
}

/// 记录批次开始信息
///
/// # 参数
/// - `start` / `end`: 本批学生在名单中的序号（从1开始，含两端）
pub fn log_batch_start(
    batch_num: usize,
    total_batches: usize,
    start: usize,
    end: usize,
    total: usize,
) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批", batch_num, total_batches);
    info!("👥 本批学生: {}-{} / 共 {} 名", start, end, total);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(report: &BatchReport) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 第 {}/{} 批完成: 出分 {}/{}，超时 {}，耗时 {:.1}s",
        report.batch_number,
        report.total_batches,
        report.graded(),
        report.results.len(),
        report.timed_out,
        report.elapsed.as_secs_f64()
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(stats: &RunStats, report_path: &Path, error_log_path: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 出分: {}/{}", stats.graded, stats.total);
    info!("❌ 零分或失败: {}（其中超时 {}）", stats.failed, stats.timed_out);
    if stats.append_failures > 0 {
        info!("⚠️  落盘失败的批次: {}", stats.append_failures);
    }
    info!("{}", "=".repeat(60));
    info!("\n报告已保存至: {}", report_path.display());
    info!("错误日志: {}", error_log_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大字符数
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
