//! 模型回复解析 - 业务能力层
//!
//! 模型的输出格式会漂移，这里是一条可插拔的解析链：
//! 严格格式 → 数字模式（X out of Y / X/Y / X%）→ 键值对 → 失败。
//! 前一个解析器一个分数都没拿到时才轮到下一个。

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::AssessError;
use crate::models::assessment::CriterionScore;
use crate::models::rubric::Rubric;
use crate::utils::logging::truncate_text;

/// 只有总分行时使用的条目名
pub const OVERALL_CRITERION: &str = "Overall";

static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(criterion|score|level|justification)\s*:\s*(.*)$").unwrap()
});
static OUT_OF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:points?\s+)?out\s+of\s+(\d+(?:\.\d+)?)").unwrap()
});
static SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*/\s*(\d+(?:\.\d+)?)").unwrap());
static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static KEY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:=]+?)\s*[:=]\s*(?:score\s*[:=]?\s*)?(\d+(?:\.\d+)?)").unwrap()
});

/// 一种回复格式的解析策略
pub trait ScoreParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// 解析不到返回空列表，由解析链决定是否继续
    fn parse(&self, response: &str, rubric: &Rubric) -> Vec<CriterionScore>;
}

/// 解析结果及命中的策略
#[derive(Debug, Clone)]
pub struct ParsedScores {
    pub strategy: &'static str,
    pub scores: Vec<CriterionScore>,
}

/// 解析链
pub struct ScoreParserChain {
    parsers: Vec<Box<dyn ScoreParser>>,
}

impl Default for ScoreParserChain {
    fn default() -> Self {
        Self {
            parsers: vec![
                Box::new(StrictTripleParser),
                Box::new(RatioParser),
                Box::new(KeyValueParser),
            ],
        }
    }
}

impl ScoreParserChain {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
        }
    }

    /// 在链尾追加一种新格式
    pub fn with_parser(mut self, parser: impl ScoreParser + 'static) -> Self {
        self.parsers.push(Box::new(parser));
        self
    }

    pub fn parse(&self, response: &str, rubric: &Rubric) -> Result<ParsedScores, AssessError> {
        for parser in &self.parsers {
            let scores = parser.parse(response, rubric);
            if !scores.is_empty() {
                debug!("解析策略 {} 命中 {} 个条目", parser.name(), scores.len());
                return Ok(ParsedScores {
                    strategy: parser.name(),
                    scores,
                });
            }
        }
        Err(AssessError::Parse {
            tried: self
                .parsers
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(", "),
            preview: truncate_text(response.trim(), 120),
        })
    }
}

// ========== 严格格式 ==========

/// CRITERION / SCORE / LEVEL / JUSTIFICATION 块
pub struct StrictTripleParser;

#[derive(Default)]
struct PendingBlock {
    criterion: String,
    score: Option<String>,
    level: Option<String>,
    justification: Vec<String>,
}

impl PendingBlock {
    fn finish(self, rubric: &Rubric) -> Option<CriterionScore> {
        if self.criterion.is_empty() {
            return None;
        }
        let justification = self.justification.join(" ").trim().to_string();
        let ratio = self.score.as_deref().and_then(parse_ratio);

        match ratio {
            Some((points, max)) => resolve(&self.criterion, points, max, justification, rubric),
            None => {
                // 没给分数时按等级描述落分
                let criterion = rubric.find_criterion(&self.criterion)?;
                let points = criterion.mark_for_level(self.level.as_deref()?)?;
                resolve(
                    &criterion.name,
                    points,
                    Some(criterion.max_points),
                    justification,
                    rubric,
                )
            }
        }
    }
}

impl ScoreParser for StrictTripleParser {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn parse(&self, response: &str, rubric: &Rubric) -> Vec<CriterionScore> {
        let mut scores = Vec::new();
        let mut block: Option<PendingBlock> = None;
        let mut in_justification = false;

        for raw in response.lines() {
            let line = strip_markdown(raw);
            let Some(caps) = FIELD_LINE.captures(&line) else {
                if in_justification && !line.is_empty() {
                    if let Some(b) = block.as_mut() {
                        b.justification.push(line.clone());
                    }
                }
                continue;
            };
            let key = caps[1].to_ascii_lowercase();
            let value = strip_markdown(&caps[2]);
            in_justification = false;

            if key == "criterion" {
                if let Some(done) = block.take().and_then(|b| b.finish(rubric)) {
                    scores.push(done);
                }
                block = Some(PendingBlock {
                    criterion: value,
                    ..PendingBlock::default()
                });
                continue;
            }

            let Some(b) = block.as_mut() else {
                continue;
            };
            match key.as_str() {
                "score" => b.score = Some(value),
                "level" => b.level = Some(value),
                _ => {
                    if !value.is_empty() {
                        b.justification.push(value);
                    }
                    in_justification = true;
                }
            }
        }
        if let Some(done) = block.and_then(|b| b.finish(rubric)) {
            scores.push(done);
        }

        dedupe(scores)
    }
}

// ========== 数字模式 ==========

/// 逐行找 "X out of Y"、"X/Y"、"X%"
pub struct RatioParser;

impl ScoreParser for RatioParser {
    fn name(&self) -> &'static str {
        "ratio"
    }

    fn parse(&self, response: &str, rubric: &Rubric) -> Vec<CriterionScore> {
        let mut scores = Vec::new();
        let mut overall: Option<CriterionScore> = None;

        for raw in response.lines() {
            let line = strip_markdown(raw);
            let hits = find_ratios(&line);

            for (i, hit) in hits.iter().enumerate() {
                let next_start = hits.get(i + 1).map_or(line.len(), |h| h.start);
                let rest = trailing_text(&line[hit.end..next_start]);
                let justification = if rest.is_empty() { line.clone() } else { rest };

                let prefix = &line[..hit.start];
                let label = criterion_before(prefix, rubric)
                    .or_else(|| {
                        (hits.len() == 1)
                            .then(|| criterion_in_line(&line, rubric))
                            .flatten()
                    })
                    .unwrap_or_else(|| label_before_separator(prefix));

                // 没有条目名的分数与总分行同等对待
                if label.is_empty() || is_total_label(&label) {
                    if overall.is_none() {
                        overall =
                            resolve(OVERALL_CRITERION, hit.points, hit.max, justification, rubric);
                    }
                    continue;
                }
                if let Some(score) = resolve(&label, hit.points, hit.max, justification, rubric) {
                    scores.push(score);
                }
            }
        }

        let scores = dedupe(scores);
        if scores.is_empty() {
            overall.into_iter().collect()
        } else {
            scores
        }
    }
}

// ========== 键值对 ==========

/// "条目: 分数" 形式，仅限结构化评分标准里已有的条目
pub struct KeyValueParser;

impl ScoreParser for KeyValueParser {
    fn name(&self) -> &'static str {
        "key_value"
    }

    fn parse(&self, response: &str, rubric: &Rubric) -> Vec<CriterionScore> {
        if rubric.criteria().is_empty() {
            return Vec::new();
        }
        let scores = response
            .lines()
            .map(strip_markdown)
            .filter_map(|line| {
                let caps = KEY_VALUE.captures(&line)?;
                let criterion = rubric.find_criterion(&caps[1])?;
                let points: f64 = caps[2].parse().ok()?;
                resolve(
                    &criterion.name,
                    points,
                    Some(criterion.max_points),
                    line.clone(),
                    rubric,
                )
            })
            .collect();
        dedupe(scores)
    }
}

// ========== 公共工具 ==========

/// 把模型给的分数对齐到评分标准
///
/// - 结构化标准：使用标准里的条目名与满分，模型满分不同时按比例换算，再落到最近的合法分值
/// - 纯文本标准：照搬模型给的条目名与满分；没有满分则无法使用
fn resolve(
    name: &str,
    points: f64,
    reported_max: Option<f64>,
    justification: String,
    rubric: &Rubric,
) -> Option<CriterionScore> {
    let name = name.trim();
    if rubric.criteria().is_empty() {
        let max_points = reported_max.filter(|m| *m > 0.0)?;
        return Some(CriterionScore {
            criterion: name.to_string(),
            points: points.clamp(0.0, max_points),
            max_points,
            justification,
        });
    }

    if name == OVERALL_CRITERION {
        let total = rubric.total_max_points().filter(|m| *m > 0.0)?;
        let points = rescale(points, reported_max, total).clamp(0.0, total);
        return Some(CriterionScore {
            criterion: OVERALL_CRITERION.to_string(),
            points,
            max_points: total,
            justification,
        });
    }

    let Some(criterion) = rubric.find_criterion(name) else {
        debug!("评分标准中没有条目 '{}'，忽略", name);
        return None;
    };
    let points = criterion.nearest_mark(rescale(points, reported_max, criterion.max_points));
    Some(CriterionScore {
        criterion: criterion.name.clone(),
        points,
        max_points: criterion.max_points,
        justification,
    })
}

fn rescale(points: f64, reported_max: Option<f64>, target_max: f64) -> f64 {
    match reported_max {
        Some(max) if max > 0.0 && (max - target_max).abs() > f64::EPSILON => {
            points / max * target_max
        }
        _ => points,
    }
}

/// "8 out of 10 points" / "8/10" / "8"
fn parse_ratio(text: &str) -> Option<(f64, Option<f64>)> {
    if let Some(ratio) = find_ratio(text) {
        return Some(ratio);
    }
    let number = NUMBER.find(text)?;
    Some((number.as_str().parse().ok()?, None))
}

/// 行内的一处分数；百分比的满分为 100
struct RatioHit {
    start: usize,
    end: usize,
    points: f64,
    max: Option<f64>,
}

/// 行内所有互不重叠的分数模式，按出现位置排序
fn find_ratios(line: &str) -> Vec<RatioHit> {
    let mut hits: Vec<RatioHit> = Vec::new();
    for pattern in [&*OUT_OF, &*SLASH, &*PERCENT] {
        for caps in pattern.captures_iter(line) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if hits
                .iter()
                .any(|h| whole.start() < h.end && h.start < whole.end())
            {
                continue;
            }
            let Ok(points) = caps[1].parse() else {
                continue;
            };
            let max = match caps.get(2) {
                Some(m) => match m.as_str().parse() {
                    Ok(max) => max,
                    Err(_) => continue,
                },
                None => 100.0,
            };
            hits.push(RatioHit {
                start: whole.start(),
                end: whole.end(),
                points,
                max: Some(max),
            });
        }
    }
    hits.sort_by_key(|h| h.start);
    hits
}

fn find_ratio(line: &str) -> Option<(f64, Option<f64>)> {
    find_ratios(line).first().map(|h| (h.points, h.max))
}

fn trailing_text(rest: &str) -> String {
    rest.trim_start_matches(|c: char| {
        c.is_whitespace() || matches!(c, '-' | ':' | '.' | ',' | ')' | '(' | '–' | '—')
    })
    .trim_start_matches("points")
    .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '.' | ',' | ')'))
    .trim()
    .to_string()
}

/// 行里出现的评分标准条目名（取最长的）
fn criterion_in_line(line: &str, rubric: &Rubric) -> Option<String> {
    let lowered = line.to_lowercase();
    rubric
        .criteria()
        .iter()
        .filter(|c| !c.name.is_empty() && lowered.contains(&c.name.to_lowercase()))
        .max_by_key(|c| c.name.len())
        .map(|c| c.name.clone())
}

/// 分数前最近出现的评分标准条目名
fn criterion_before(prefix: &str, rubric: &Rubric) -> Option<String> {
    let lowered = prefix.to_lowercase();
    rubric
        .criteria()
        .iter()
        .filter(|c| !c.name.is_empty())
        .filter_map(|c| {
            let name = c.name.to_lowercase();
            lowered.rfind(&name).map(|at| (at + name.len(), c))
        })
        .max_by_key(|(end, c)| (*end, c.name.len()))
        .map(|(_, c)| c.name.clone())
}

/// "Label: 8/10"、"Label - 8/10" 里的 Label；不含字母的前缀不算
fn label_before_separator(prefix: &str) -> String {
    let trimmed = prefix.trim_end();
    let label = match trimmed.strip_suffix([':', '-', '–', '—', '=']) {
        Some(label) => label,
        None => match trimmed.split_once(':') {
            Some((label, _)) => label,
            None => return String::new(),
        },
    };
    let label = strip_markdown(label);
    if label.chars().any(char::is_alphabetic) {
        label
    } else {
        String::new()
    }
}

fn is_total_label(label: &str) -> bool {
    let lowered = label.to_lowercase();
    lowered.contains("total") || lowered.contains("overall") || lowered.contains("final score")
}

/// 去掉常见的 markdown 修饰：列表符、标题符、加粗
fn strip_markdown(line: &str) -> String {
    line.replace("**", "")
        .replace("__", "")
        .trim()
        .trim_start_matches(['#', '-', '*', '>', '•'])
        .trim()
        .to_string()
}

/// 同名条目只保留第一个
fn dedupe(scores: Vec<CriterionScore>) -> Vec<CriterionScore> {
    let mut seen = HashSet::new();
    scores
        .into_iter()
        .filter(|s| seen.insert(s.criterion.to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rubric::{Criterion, Level};

    fn rubric() -> Rubric {
        Rubric::Structured(vec![
            Criterion::new("Code Quality", 10.0),
            Criterion::new("Testing", 10.0),
        ])
    }

    fn points_of(scores: &[CriterionScore]) -> Vec<(String, f64, f64)> {
        scores
            .iter()
            .map(|s| (s.criterion.clone(), s.points, s.max_points))
            .collect()
    }

    const STRICT: &str = "\
**CRITERION:** Code Quality
SCORE: 8 out of 10 points
LEVEL: Good
JUSTIFICATION: Clean functions,
with a few long ones.

CRITERION: Testing
SCORE: 6 out of 10 points
LEVEL: Fair
JUSTIFICATION: Some unit tests.";

    const PROSE: &str = "\
Overall a solid submission.
- Code Quality: 8 out of 10 - clean functions.
- Testing: 6 out of 10 - some unit tests.";

    const PERCENTAGES: &str = "\
Code Quality: 80% (clean functions)
Testing: 60% (some unit tests)";

    #[test]
    fn three_dialects_yield_equivalent_scores() {
        let chain = ScoreParserChain::default();
        let expected = vec![
            ("Code Quality".to_string(), 8.0, 10.0),
            ("Testing".to_string(), 6.0, 10.0),
        ];

        let strict = chain.parse(STRICT, &rubric()).unwrap();
        assert_eq!(strict.strategy, "strict");
        assert_eq!(points_of(&strict.scores), expected);
        assert_eq!(
            strict.scores[0].justification,
            "Clean functions, with a few long ones."
        );

        let prose = chain.parse(PROSE, &rubric()).unwrap();
        assert_eq!(prose.strategy, "ratio");
        assert_eq!(points_of(&prose.scores), expected);

        let percent = chain.parse(PERCENTAGES, &rubric()).unwrap();
        assert_eq!(percent.strategy, "ratio");
        assert_eq!(points_of(&percent.scores), expected);
    }

    #[test]
    fn no_numbers_is_a_parse_error() {
        let err = ScoreParserChain::default()
            .parse("The code looks fine overall.", &rubric())
            .unwrap_err();
        match err {
            AssessError::Parse { tried, preview } => {
                assert_eq!(tried, "strict, ratio, key_value");
                assert!(preview.starts_with("The code looks fine"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn raw_rubric_echoes_model_criteria() {
        let rubric = Rubric::RawText("Grade readability and design.".into());
        let parsed = ScoreParserChain::default()
            .parse("CRITERION: Readability\nSCORE: 4 out of 5\nJUSTIFICATION: ok", &rubric)
            .unwrap();
        assert_eq!(points_of(&parsed.scores), vec![("Readability".into(), 4.0, 5.0)]);
    }

    #[test]
    fn level_text_maps_to_rubric_mark() {
        let mut testing = Criterion::new("Testing", 10.0);
        testing.levels = vec![
            Level {
                min_points: 0.0,
                max_points: 4.0,
                description: "Poor".into(),
            },
            Level {
                min_points: 5.0,
                max_points: 10.0,
                description: "Excellent".into(),
            },
        ];
        let rubric = Rubric::Structured(vec![testing]);

        let parsed = ScoreParserChain::default()
            .parse("CRITERION: Testing\nLEVEL: Excellent\nJUSTIFICATION: thorough", &rubric)
            .unwrap();
        assert_eq!(parsed.scores[0].points, 10.0);

        // 4.5 落在两个等级之间，取最近的端点
        let parsed = ScoreParserChain::default()
            .parse("Testing: 4.5/10", &rubric)
            .unwrap();
        assert_eq!(parsed.scores[0].points, 4.0);
    }

    #[test]
    fn model_scale_is_rescaled_to_rubric_max() {
        let parsed = ScoreParserChain::default()
            .parse("Code Quality: 4/5", &rubric())
            .unwrap();
        assert_eq!(points_of(&parsed.scores), vec![("Code Quality".into(), 8.0, 10.0)]);
    }

    #[test]
    fn total_line_is_used_only_alone() {
        let parsed = ScoreParserChain::default()
            .parse("Total Score: 15/20", &rubric())
            .unwrap();
        assert_eq!(
            points_of(&parsed.scores),
            vec![(OVERALL_CRITERION.into(), 15.0, 20.0)]
        );

        let parsed = ScoreParserChain::default()
            .parse("Testing: 5/10\nTotal: 5/20", &rubric())
            .unwrap();
        assert_eq!(points_of(&parsed.scores), vec![("Testing".into(), 5.0, 10.0)]);
    }

    #[test]
    fn key_value_needs_known_criteria() {
        let parsed = ScoreParserChain::default()
            .parse("Code Quality = 7\nStyle: 3", &rubric())
            .unwrap();
        assert_eq!(parsed.strategy, "key_value");
        assert_eq!(points_of(&parsed.scores), vec![("Code Quality".into(), 7.0, 10.0)]);

        let raw = Rubric::RawText("anything".into());
        assert!(KeyValueParser.parse("Code Quality = 7", &raw).is_empty());
    }

    struct FixedParser;

    impl ScoreParser for FixedParser {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn parse(&self, _response: &str, _rubric: &Rubric) -> Vec<CriterionScore> {
            vec![CriterionScore {
                criterion: "Testing".into(),
                points: 1.0,
                max_points: 10.0,
                justification: String::new(),
            }]
        }
    }

    #[test]
    fn chain_accepts_new_dialects() {
        let chain = ScoreParserChain::empty().with_parser(FixedParser);
        assert_eq!(chain.parse("whatever", &rubric()).unwrap().strategy, "fixed");
    }

    #[test]
    fn unlabelled_ratio_counts_as_overall() {
        let parsed = ScoreParserChain::default()
            .parse("I would rate this submission 7 out of 10.", &rubric())
            .unwrap();
        assert_eq!(parsed.strategy, "ratio");
        assert_eq!(
            points_of(&parsed.scores),
            vec![(OVERALL_CRITERION.into(), 14.0, 20.0)]
        );
    }

    #[test]
    fn dash_separated_labels_on_raw_rubric() {
        let rubric = Rubric::RawText("Grade readability and testing.".into());
        let parsed = ScoreParserChain::default()
            .parse("Readability - 4 out of 5\nTesting – 3 out of 5", &rubric)
            .unwrap();
        assert_eq!(
            points_of(&parsed.scores),
            vec![("Readability".into(), 4.0, 5.0), ("Testing".into(), 3.0, 5.0)]
        );
    }

    #[test]
    fn every_ratio_in_a_line_is_paired_with_its_criterion() {
        let parsed = ScoreParserChain::default()
            .parse("Code quality earns 8 out of 10 and testing 6 out of 10.", &rubric())
            .unwrap();
        assert_eq!(
            points_of(&parsed.scores),
            vec![
                ("Code Quality".into(), 8.0, 10.0),
                ("Testing".into(), 6.0, 10.0)
            ]
        );
        assert_eq!(parsed.scores[0].justification, "and testing");
    }
}
