use std::path::Path;

use serde::Deserialize;
use tokio::fs;

use crate::error::{AppError, AppResult, FileError, InputError};
use crate::models::student::Student;

/// TOML 名单：`[[students]]` 数组
#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    students: Vec<Student>,
}

/// 从 TOML 或 JSON 文件加载学生名单
///
/// 名单为空视为致命错误；地址是否合法不在这里判断，交给评分流程逐个处理。
pub async fn load_roster(path: &Path) -> AppResult<Vec<Student>> {
    let path_str = path.display().to_string();
    if !path.exists() {
        return Err(AppError::File(FileError::NotFound { path: path_str }));
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file_read_failed(&path_str, e))?;

    let students = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => parse_json_roster(&content, &path_str)?,
        _ => {
            let roster: RosterFile = toml::from_str(&content)
                .map_err(|e| AppError::file_parse_failed(&path_str, e))?;
            roster.students
        }
    };

    for (index, student) in students.iter().enumerate() {
        if student.name.trim().is_empty() {
            return Err(InputError::InvalidRosterEntry {
                index,
                reason: "missing name".to_string(),
            }
            .into());
        }
    }

    if students.is_empty() {
        return Err(InputError::EmptyRoster { path: path_str }.into());
    }

    tracing::info!("名单加载完成: {} 名学生 ({})", students.len(), path_str);
    Ok(students)
}

/// JSON 名单可以是数组，也可以是 `{"students": [...]}`
fn parse_json_roster(content: &str, path_str: &str) -> AppResult<Vec<Student>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum JsonRoster {
        List(Vec<Student>),
        Wrapped { students: Vec<Student> },
    }

    let roster: JsonRoster =
        serde_json::from_str(content).map_err(|e| AppError::file_parse_failed(path_str, e))?;
    Ok(match roster {
        JsonRoster::List(students) | JsonRoster::Wrapped { students } => students,
    })
}
