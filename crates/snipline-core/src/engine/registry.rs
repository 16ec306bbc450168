//! Language -> engine resolution.

use std::collections::BTreeMap;

use snipline_state::Language;

use super::Engine;
use crate::domain::{PipelineError, Result};

/// Slots per engine in the standard catalog; Python gets a larger pool.
const STANDARD_CAPACITY: u32 = 16;
const PYTHON_CAPACITY: u32 = 64;

/// Engine catalog keyed by engine code.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Engine>,
}

impl EngineRegistry {
    /// Registry with no engines.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard catalog: one engine per supported language, codes
    /// `a` through `o`.
    pub fn standard() -> Self {
        let catalog = [
            ("a", Language::Python),
            ("b", Language::JavaScript),
            ("c", Language::TypeScript),
            ("d", Language::Rust),
            ("e", Language::Java),
            ("f", Language::Swift),
            ("g", Language::Cpp),
            ("h", Language::R),
            ("i", Language::Go),
            ("j", Language::Ruby),
            ("k", Language::CSharp),
            ("l", Language::Kotlin),
            ("m", Language::C),
            ("n", Language::Bash),
            ("o", Language::Perl),
        ];
        catalog
            .into_iter()
            .fold(Self::empty(), |registry, (code, language)| {
                let capacity = if language == Language::Python {
                    PYTHON_CAPACITY
                } else {
                    STANDARD_CAPACITY
                };
                registry.with_engine(Engine::for_language(code, language, capacity))
            })
    }

    /// Add (or replace) an engine.
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engines.insert(engine.code.clone(), engine);
        self
    }

    /// Set the slot capacity of every engine.
    pub fn with_capacity_override(mut self, capacity: u32) -> Self {
        for engine in self.engines.values_mut() {
            engine.slot_capacity = capacity;
        }
        self
    }

    /// Engines serving `language`, ordered by code. May be empty.
    pub fn resolve(&self, language: Language) -> Vec<Engine> {
        self.engines
            .values()
            .filter(|e| e.language == language)
            .cloned()
            .collect()
    }

    /// Look up an engine by code.
    pub fn get(&self, code: &str) -> Result<&Engine> {
        self.engines
            .get(code)
            .ok_or_else(|| PipelineError::InvalidInput(format!("unknown engine: {code}")))
    }

    /// All engines, ordered by code.
    pub fn engines(&self) -> impl Iterator<Item = &Engine> {
        self.engines.values()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
