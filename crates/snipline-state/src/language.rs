//! Supported snippet languages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Source language of a snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Java,
    Swift,
    Cpp,
    R,
    Go,
    Ruby,
    CSharp,
    Kotlin,
    C,
    Bash,
    Perl,
}

/// Returned when a language name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown language: {0}")]
pub struct ParseLanguageError(pub String);

impl Language {
    pub const ALL: [Language; 15] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Rust,
        Language::Java,
        Language::Swift,
        Language::Cpp,
        Language::R,
        Language::Go,
        Language::Ruby,
        Language::CSharp,
        Language::Kotlin,
        Language::C,
        Language::Bash,
        Language::Perl,
    ];

    /// Canonical lowercase name (also the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::Swift => "swift",
            Language::Cpp => "cpp",
            Language::R => "r",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::CSharp => "csharp",
            Language::Kotlin => "kotlin",
            Language::C => "c",
            Language::Bash => "bash",
            Language::Perl => "perl",
        }
    }

    /// File extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => ".py",
            Language::JavaScript => ".js",
            Language::TypeScript => ".ts",
            Language::Rust => ".rs",
            Language::Java => ".java",
            Language::Swift => ".swift",
            Language::Cpp => ".cpp",
            Language::R => ".r",
            Language::Go => ".go",
            Language::Ruby => ".rb",
            Language::CSharp => ".cs",
            Language::Kotlin => ".kt",
            Language::C => ".c",
            Language::Bash => ".sh",
            Language::Perl => ".pl",
        }
    }

    /// Reverse of [`Language::extension`]; accepts the extension with or
    /// without its leading dot.
    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "h" => Some(Language::C),
            "cc" | "cxx" | "hpp" => Some(Language::Cpp),
            "bash" => Some(Language::Bash),
            _ => Language::ALL
                .into_iter()
                .find(|lang| lang.extension()[1..] == ext),
        }
    }

    /// Line-comment prefix used for rendered artifact headers.
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Language::Python | Language::Ruby | Language::R | Language::Bash | Language::Perl => {
                "#"
            }
            _ => "//",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ParseLanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Language::Python,
            "javascript" | "js" | "node" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "rust" | "rs" => Language::Rust,
            "java" => Language::Java,
            "swift" => Language::Swift,
            "cpp" | "c++" | "cxx" | "cc" => Language::Cpp,
            "r" => Language::R,
            "go" | "golang" => Language::Go,
            "ruby" | "rb" => Language::Ruby,
            "csharp" | "c#" | "cs" => Language::CSharp,
            "kotlin" | "kt" => Language::Kotlin,
            "c" => Language::C,
            "bash" | "sh" | "shell" => Language::Bash,
            "perl" | "pl" => Language::Perl,
            _ => return Err(ParseLanguageError(s.to_string())),
        };
        Ok(lang)
    }
}
