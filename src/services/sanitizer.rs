//! 内容清洗与分块 - 业务能力层
//!
//! 学生代码里的某些字眼会触发模型提供方的内容安全过滤，
//! 送审前先处理掉；文件标记行保持原样，分块依赖它们。

use regex::Regex;

use crate::config::SanitizeMode;
use crate::error::{AppError, AppResult};
use crate::models::code::{CodeChunk, FILE_MARKER_PREFIX};

const REDACTION: &str = "[REDACTED]";

/// 内容清洗器
#[derive(Debug, Clone)]
pub struct ContentSanitizer {
    pattern: Option<Regex>,
    mode: SanitizeMode,
}

impl ContentSanitizer {
    /// 按敏感词表构造，大小写不敏感；空词表表示不清洗
    pub fn new(denylist: &[String], mode: SanitizeMode) -> AppResult<Self> {
        let words: Vec<String> = denylist
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();

        let pattern = if words.is_empty() {
            None
        } else {
            let source = format!("(?i)({})", words.join("|"));
            Some(Regex::new(&source).map_err(|e| {
                AppError::invalid_config("sanitizer_denylist", e.to_string())
            })?)
        };

        Ok(Self { pattern, mode })
    }

    /// 清洗一段代码文本
    pub fn sanitize(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };

        let mut out = String::with_capacity(text.len());
        for line in text.split_inclusive('\n') {
            if is_marker_line(line) || !pattern.is_match(line) {
                out.push_str(line);
                continue;
            }
            match self.mode {
                SanitizeMode::Redact => out.push_str(&pattern.replace_all(line, REDACTION)),
                SanitizeMode::DropLine => {
                    if line.ends_with('\n') {
                        out.push('\n');
                    }
                }
            }
        }
        out
    }
}

fn is_marker_line(line: &str) -> bool {
    line.trim_start().starts_with(FILE_MARKER_PREFIX)
}

/// 按文件标记把代码切成不超过 `max_chars` 个字符的有序分块
///
/// 文本整体不超限时原样作为一个分块；否则按文件段落贪心打包，
/// 单个段落本身超限时按固定字符数硬切。拼回去与原文一致。
pub fn chunk(text: &str, max_chars: usize) -> Vec<CodeChunk> {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return vec![CodeChunk {
            index: 0,
            text: text.to_string(),
        }];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for section in split_sections(text) {
        let section_len = section.chars().count();

        if section_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            pieces.extend(split_fixed(section, max_chars));
            continue;
        }

        if current_len + section_len > max_chars && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(section);
        current_len += section_len;
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| CodeChunk { index, text })
        .collect()
}

/// 在每个标记行之前切开；标记行之前的前导内容单独成段
fn split_sections(text: &str) -> Vec<&str> {
    let mut starts = vec![0];
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if offset > 0 && is_marker_line(line) {
            starts.push(offset);
        }
        offset += line.len();
    }
    starts.push(text.len());

    starts
        .windows(2)
        .map(|w| &text[w[0]..w[1]])
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_fixed(section: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = section.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::code::CodeBlob;

    fn sanitizer(mode: SanitizeMode) -> ContentSanitizer {
        ContentSanitizer::new(&Config::default().sanitizer_denylist, mode).unwrap()
    }

    #[test]
    fn redact_replaces_words_case_insensitively() {
        let out = sanitizer(SanitizeMode::Redact).sanitize("API_KEY = 'x'\nPassword check\nprint(1)\n");
        assert_eq!(out, "API_[REDACTED] = 'x'\n[REDACTED] check\nprint(1)\n");
    }

    #[test]
    fn drop_line_removes_matching_lines() {
        let out = sanitizer(SanitizeMode::DropLine).sanitize("a = 1\nsecret = 2\nb = 3");
        assert_eq!(out, "a = 1\n\nb = 3");
    }

    #[test]
    fn marker_lines_survive_sanitizing() {
        let marker = CodeBlob::marker_line("admin/token_utils.py");
        let text = format!("{}\nroot = 1\n", marker);
        let out = sanitizer(SanitizeMode::DropLine).sanitize(&text);
        assert!(out.starts_with(&marker));
        assert!(!out.contains("root"));
    }

    #[test]
    fn empty_denylist_is_passthrough() {
        let s = ContentSanitizer::new(&[], SanitizeMode::Redact).unwrap();
        assert_eq!(s.sanitize("password"), "password");
    }

    #[test]
    fn denylist_words_are_escaped() {
        let s = ContentSanitizer::new(&["c++".to_string()], SanitizeMode::Redact).unwrap();
        assert_eq!(s.sanitize("uses c++ and c"), "uses [REDACTED] and c");
    }

    #[test]
    fn small_text_is_a_single_chunk() {
        let chunks = chunk("print(1)\n", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn chunks_respect_limit_and_reassemble() {
        let mut text = String::new();
        for i in 0..6 {
            CodeBlob::push_file(&mut text, &format!("f{}.py", i), &"x = 1\n".repeat(i + 1));
        }
        CodeBlob::push_file(&mut text, "huge.py", &"y".repeat(250));

        let chunks = chunk(&text, 80);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(c.text.chars().count() <= 80);
        }
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn chunks_start_at_file_boundaries_when_possible() {
        let mut text = String::new();
        CodeBlob::push_file(&mut text, "a.py", &"a".repeat(30));
        CodeBlob::push_file(&mut text, "b.py", &"b".repeat(30));

        let chunks = chunk(&text, 60);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("# === FILE: a.py ==="));
        assert!(chunks[1].text.starts_with("# === FILE: b.py ==="));
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "é".repeat(25);
        let chunks = chunk(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text.chars().count(), 5);
    }
}
