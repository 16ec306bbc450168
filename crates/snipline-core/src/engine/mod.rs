//! Execution engines and the registry that maps languages to them.
//!
//! An engine is one isolated runtime for one language with a fixed number
//! of production slots. Engines are configuration: the pipeline reads them
//! but never mutates them.

pub mod registry;

use serde::{Deserialize, Serialize};
use snipline_state::Language;

pub use registry::EngineRegistry;

/// One isolated runtime for one language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Engine {
    /// Short code, e.g. `m`.
    pub code: String,
    /// Display name, e.g. `C`.
    pub name: String,
    pub language: Language,
    pub slot_capacity: u32,
}

impl Engine {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        language: Language,
        slot_capacity: u32,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            language,
            slot_capacity,
        }
    }

    /// Engine for `language` named after it (`CPP`, `GO`, ...).
    pub fn for_language(code: impl Into<String>, language: Language, slot_capacity: u32) -> Self {
        Self::new(code, language.as_str().to_ascii_uppercase(), language, slot_capacity)
    }

    /// Slot address for a position, e.g. `m2`.
    pub fn address(&self, position: u32) -> String {
        format!("{}{}", self.code, position)
    }

    /// Display form used in rendered headers: `C (m)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.code)
    }
}
