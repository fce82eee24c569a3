use serde::{Deserialize, Serialize};

use crate::models::rubric::Rubric;

/// 单个条目的得分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    pub points: f64,
    pub max_points: f64,
    pub justification: String,
}

/// 一次评分的结果（整份代码或一个分块）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub criteria_scores: Vec<CriterionScore>,
    pub total_points: f64,
    pub max_points: f64,
    pub percentage: f64,
    pub passing: bool,
}

impl Assessment {
    /// 由条目得分汇总
    ///
    /// 结构化评分标准以标准自身总分为满分；纯文本标准以模型给出的各项满分之和为满分。
    pub fn from_scores(
        criteria_scores: Vec<CriterionScore>,
        rubric: &Rubric,
        passing_threshold: f64,
    ) -> Self {
        let total_points: f64 = criteria_scores.iter().map(|s| s.points).sum();
        let max_points = rubric
            .total_max_points()
            .filter(|m| *m > 0.0)
            .unwrap_or_else(|| criteria_scores.iter().map(|s| s.max_points).sum());
        let percentage = percentage(total_points, max_points);
        Self {
            criteria_scores,
            total_points,
            max_points,
            percentage,
            passing: percentage >= passing_threshold,
        }
    }
}

/// 百分比，保留两位小数；满分为 0 时返回 0
pub fn percentage(points: f64, max_points: f64) -> f64 {
    if max_points <= 0.0 {
        return 0.0;
    }
    (points / max_points * 100.0 * 100.0).round() / 100.0
}
