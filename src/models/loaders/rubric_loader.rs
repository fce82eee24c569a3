use std::path::Path;

use serde_json::Value;
use tokio::fs;

use crate::error::{AppError, AppResult, FileError};
use crate::models::rubric::Rubric;

/// 加载评分标准并立即归一化
///
/// - `.json`：按 JSON 结构归一化
/// - `.toml`：先转成 JSON 值再归一化
/// - 其他：尝试 JSON，失败则作为纯文本原样转发
pub async fn load_rubric(path: &Path) -> AppResult<Rubric> {
    let path_str = path.display().to_string();
    if !path.exists() {
        return Err(AppError::File(FileError::NotFound { path: path_str }));
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file_read_failed(&path_str, e))?;

    let rubric = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| AppError::file_parse_failed(&path_str, e))?;
            Rubric::from_value(value)?
        }
        Some("toml") => {
            let table: toml::Table = toml::from_str(&content)
                .map_err(|e| AppError::file_parse_failed(&path_str, e))?;
            let value = serde_json::to_value(table)
                .map_err(|e| AppError::file_parse_failed(&path_str, e))?;
            Rubric::from_value(value)?
        }
        _ => Rubric::from_text(&content)?,
    };

    match &rubric {
        Rubric::RawText(text) => {
            tracing::info!("评分标准加载完成: 纯文本 {} 字符", text.chars().count())
        }
        Rubric::Structured(criteria) => tracing::info!(
            "评分标准加载完成: {} 个条目，总分 {}",
            criteria.len(),
            rubric.total_max_points().unwrap_or_default()
        ),
    }

    Ok(rubric)
}
