//! 评分标准
//!
//! 外部加载器给出的评分标准形态不一（纯文本、条目列表、按类别的表），
//! 在边界处统一归一化为 [`Rubric`]，核心流程只认这一个类型。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InputError;

/// 条目未写分值时的默认满分
const DEFAULT_CRITERION_POINTS: f64 = 10.0;

/// 评分等级（某个分数区间及其描述）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub min_points: f64,
    pub max_points: f64,
    pub description: String,
}

/// 单个评分条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub max_points: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub levels: Vec<Level>,
}

impl Criterion {
    pub fn new(name: impl Into<String>, max_points: f64) -> Self {
        Self {
            name: name.into(),
            max_points,
            description: None,
            levels: Vec::new(),
        }
    }

    /// 把模型给的分数映射到最近的合法分值
    ///
    /// 先夹到 `[0, max_points]`；若定义了等级且分数不落在任何区间内，
    /// 取距离最近的区间端点。
    pub fn nearest_mark(&self, points: f64) -> f64 {
        let clamped = if self.max_points > 0.0 {
            points.clamp(0.0, self.max_points)
        } else {
            points.max(0.0)
        };
        if self.levels.is_empty()
            || self
                .levels
                .iter()
                .any(|l| clamped >= l.min_points && clamped <= l.max_points)
        {
            return clamped;
        }
        self.levels
            .iter()
            .flat_map(|l| [l.min_points, l.max_points])
            .min_by(|a, b| {
                (a - clamped)
                    .abs()
                    .partial_cmp(&(b - clamped).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(clamped)
    }

    /// 按等级描述文字找分值（取该等级上限）
    pub fn mark_for_level(&self, level_text: &str) -> Option<f64> {
        let wanted = level_text.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.levels
            .iter()
            .find(|l| {
                let desc = l.description.to_lowercase();
                !desc.is_empty() && (wanted.contains(&desc) || desc.contains(&wanted))
            })
            .map(|l| l.max_points)
    }
}

/// 归一化后的评分标准
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Rubric {
    /// 原样转发给模型的文本
    RawText(String),
    /// 条目化的评分标准
    Structured(Vec<Criterion>),
}

impl Rubric {
    /// 从文本归一化：能解析成 JSON 的按结构处理，否则当作纯文本
    pub fn from_text(text: &str) -> Result<Self, InputError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(InputError::EmptyRubric);
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ (Value::Array(_) | Value::Object(_))) => Self::from_value(value),
            _ => Ok(Rubric::RawText(trimmed.to_string())),
        }
    }

    /// 从任意 JSON 形态归一化
    pub fn from_value(value: Value) -> Result<Self, InputError> {
        match value {
            Value::Null => Err(InputError::EmptyRubric),
            Value::String(s) => Self::from_text(&s),
            Value::Array(items) => {
                let criteria = items
                    .iter()
                    .filter_map(criterion_from_value)
                    .collect::<Vec<_>>();
                if criteria.is_empty() {
                    return Err(InputError::EmptyRubric);
                }
                Ok(Rubric::Structured(criteria))
            }
            Value::Object(map) => {
                if let Some(inner) = map.get("rubric") {
                    return Self::from_value(inner.clone());
                }
                if let Some(list @ Value::Array(_)) = map.get("criteria") {
                    return Self::from_value(list.clone());
                }
                if let Some(Value::Object(categories)) = map.get("categories") {
                    let criteria = categories
                        .iter()
                        .map(|(name, details)| Criterion {
                            name: name.clone(),
                            max_points: number_field(details, &["max_points", "points", "max"])
                                .unwrap_or(DEFAULT_CRITERION_POINTS),
                            description: string_field(details, &["description"]),
                            levels: levels_from(details),
                        })
                        .collect::<Vec<_>>();
                    if criteria.is_empty() {
                        return Err(InputError::EmptyRubric);
                    }
                    return Ok(Rubric::Structured(criteria));
                }
                if map.is_empty() {
                    return Err(InputError::EmptyRubric);
                }
                // 认不出的结构，原样转发
                let text = serde_json::to_string_pretty(&Value::Object(map))
                    .map_err(|_| InputError::EmptyRubric)?;
                Ok(Rubric::RawText(text))
            }
            other => Ok(Rubric::RawText(other.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Rubric::RawText(text) => text.trim().is_empty(),
            Rubric::Structured(criteria) => criteria.is_empty(),
        }
    }

    pub fn criteria(&self) -> &[Criterion] {
        match self {
            Rubric::RawText(_) => &[],
            Rubric::Structured(criteria) => criteria,
        }
    }

    /// 结构化评分标准的总分
    pub fn total_max_points(&self) -> Option<f64> {
        match self {
            Rubric::RawText(_) => None,
            Rubric::Structured(criteria) => Some(criteria.iter().map(|c| c.max_points).sum()),
        }
    }

    /// 按名称查找条目：先精确（忽略大小写），再互相包含
    pub fn find_criterion(&self, name: &str) -> Option<&Criterion> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        let criteria = self.criteria();
        criteria
            .iter()
            .find(|c| c.name.to_lowercase() == wanted)
            .or_else(|| {
                criteria.iter().find(|c| {
                    let own = c.name.to_lowercase();
                    wanted.contains(&own) || own.contains(&wanted)
                })
            })
    }

    /// 渲染进提示词
    pub fn render_for_prompt(&self) -> String {
        match self {
            Rubric::RawText(text) => text.clone(),
            Rubric::Structured(criteria) => {
                let mut out = String::from("Assessment Criteria:\n\n");
                for criterion in criteria {
                    out.push_str(&format!(
                        "{} [Maximum {} points]\n",
                        criterion.name,
                        format_points(criterion.max_points)
                    ));
                    if let Some(description) = &criterion.description {
                        out.push_str(&format!("  {}\n", description));
                    }
                    for level in &criterion.levels {
                        out.push_str(&format!(
                            "- Level ({}-{}): {}\n",
                            format_points(level.min_points),
                            format_points(level.max_points),
                            level.description
                        ));
                    }
                    out.push('\n');
                }
                out
            }
        }
    }
}

/// 整数分值不带小数点
pub fn format_points(points: f64) -> String {
    if points.fract() == 0.0 {
        format!("{:.0}", points)
    } else {
        format!("{}", (points * 100.0).round() / 100.0)
    }
}

fn criterion_from_value(value: &Value) -> Option<Criterion> {
    match value {
        Value::String(name) if !name.trim().is_empty() => {
            Some(Criterion::new(name.trim(), DEFAULT_CRITERION_POINTS))
        }
        Value::Object(_) => {
            let name = string_field(value, &["criterion", "name", "title"])?;
            Some(Criterion {
                name,
                max_points: number_field(value, &["max_points", "points", "max"])
                    .unwrap_or(DEFAULT_CRITERION_POINTS),
                description: string_field(value, &["description"]),
                levels: levels_from(value),
            })
        }
        _ => None,
    }
}

fn levels_from(value: &Value) -> Vec<Level> {
    value
        .get("levels")
        .and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| {
                    Some(Level {
                        min_points: number_field(level, &["min_points", "min"])?,
                        max_points: number_field(level, &["max_points", "max"])?,
                        description: string_field(level, &["description"]).unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
        .map(str::to_string)
}

/// 分值可能是数字也可能是 "15" 这样的字符串
fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| value.get(*k)).find_map(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
