//! Feature flags for optional engine components.

use serde::Deserialize;

/// Switches for the engine's independently optional components.
///
/// The structured store can be switched off only for throwaway in-memory
/// sessions; with it off the facade keeps entities in process memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Persist entities to the configured structured store.
    pub structured: bool,
    /// Maintain the semantic vector index.
    pub vector: bool,
    /// Allow summarization.
    pub summarizer: bool,
    /// Allow consistency checks.
    pub consistency: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl FeatureFlags {
    /// Creates feature flags with every optional component disabled.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            structured: false,
            vector: false,
            summarizer: false,
            consistency: false,
        }
    }

    /// Creates feature flags with only the structured store enabled.
    #[must_use]
    pub const fn core() -> Self {
        Self {
            structured: true,
            vector: false,
            summarizer: false,
            consistency: false,
        }
    }

    /// Creates feature flags with all components enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            structured: true,
            vector: true,
            summarizer: true,
            consistency: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let flags: FeatureFlags = toml::from_str("vector = false").unwrap();
        assert!(!flags.vector);
        assert!(flags.structured);
        assert!(flags.summarizer);
    }
}
