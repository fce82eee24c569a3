//! 仓库代码文本及其分块

use std::fmt;

/// 每个文件段落的起始标记，分块时按它切分
pub const FILE_MARKER_PREFIX: &str = "# === FILE:";

/// 代码来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobSource {
    /// 分支压缩包
    Archive { branch: String },
    /// 文件树 API 逐个拉取
    TreeApi { branch: String },
}

impl fmt::Display for BlobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobSource::Archive { branch } => write!(f, "archive@{}", branch),
            BlobSource::TreeApi { branch } => write!(f, "tree-api@{}", branch),
        }
    }
}

/// 拼接后的仓库代码
#[derive(Debug, Clone)]
pub struct CodeBlob {
    pub text: String,
    pub file_count: usize,
    pub source: BlobSource,
}

impl CodeBlob {
    /// 生成一个文件段落的标记行
    pub fn marker_line(relative_path: &str) -> String {
        format!("{} {} ===", FILE_MARKER_PREFIX, relative_path)
    }

    /// 追加一个文件段落
    pub fn push_file(text: &mut String, relative_path: &str, content: &str) {
        text.push_str(&Self::marker_line(relative_path));
        text.push('\n');
        text.push_str(content);
        if !content.ends_with('\n') {
            text.push('\n');
        }
        text.push('\n');
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// 一个有序分块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChunk {
    pub index: usize,
    pub text: String,
}
