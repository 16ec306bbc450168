//! Per-language compile and run commands.
//!
//! Commands run with the scratch directory as working directory, so they
//! refer to the source file and build outputs by relative name.

use serde::{Deserialize, Serialize};
use snipline_state::Language;

/// How to build and start a snippet for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    /// File name the source is written to inside the scratch directory.
    pub source_file: String,
    /// Optional build step; a non-zero exit is reported as the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Toolchain {
    pub fn interpreted(source_file: &str, run: &[&str]) -> Self {
        Self {
            source_file: source_file.to_string(),
            compile: None,
            run: argv(run),
        }
    }

    pub fn compiled(source_file: &str, compile: &[&str], run: &[&str]) -> Self {
        Self {
            source_file: source_file.to_string(),
            compile: Some(argv(compile)),
            run: argv(run),
        }
    }

    /// Default toolchain for a language.
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Python => Self::interpreted("main.py", &["python3", "main.py"]),
            Language::JavaScript => Self::interpreted("main.js", &["node", "main.js"]),
            Language::TypeScript => Self::interpreted("main.ts", &["tsx", "main.ts"]),
            Language::Rust => {
                Self::compiled("main.rs", &["rustc", "-O", "-o", "main", "main.rs"], &["./main"])
            }
            Language::Java => Self::compiled(
                "Main.java",
                &["javac", "Main.java"],
                &["java", "-cp", ".", "Main"],
            ),
            Language::Swift => Self::compiled(
                "main.swift",
                &["swiftc", "-O", "-o", "main", "main.swift"],
                &["./main"],
            ),
            Language::Cpp => Self::compiled(
                "main.cpp",
                &["g++", "-std=c++17", "-O2", "-pipe", "-o", "main", "main.cpp"],
                &["./main"],
            ),
            Language::R => Self::interpreted("main.r", &["Rscript", "main.r"]),
            Language::Go => Self::compiled(
                "main.go",
                &["go", "build", "-o", "main", "main.go"],
                &["./main"],
            ),
            Language::Ruby => Self::interpreted("main.rb", &["ruby", "main.rb"]),
            Language::CSharp => Self::compiled(
                "main.cs",
                &["mcs", "-out:main.exe", "main.cs"],
                &["mono", "main.exe"],
            ),
            Language::Kotlin => Self::compiled(
                "main.kt",
                &["kotlinc", "main.kt", "-include-runtime", "-d", "main.jar"],
                &["java", "-jar", "main.jar"],
            ),
            Language::C => Self::compiled(
                "main.c",
                &["gcc", "-std=c11", "-O2", "-pipe", "-o", "main", "main.c", "-lm"],
                &["./main"],
            ),
            Language::Bash => Self::interpreted("main.sh", &["bash", "main.sh"]),
            Language::Perl => Self::interpreted("main.pl", &["perl", "main.pl"]),
        }
    }
}
