//! Model alias resolution.
//!
//! Clients name models loosely (`"sonnet"`, `"claude-3.5-haiku"`, a dated id).
//! [`ModelAliasTable`] turns those names into the canonical id the backend serves.
//! The table is immutable once built and is shared across requests behind an `Arc`.

use std::collections::HashMap;

pub const DEFAULT_OPUS_MODEL: &str = "claude-3-opus-20240229";
pub const DEFAULT_SONNET_MODEL: &str = "claude-3-sonnet-20240229";
pub const DEFAULT_HAIKU_MODEL: &str = "claude-3-haiku-20240307";

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("claude-3-opus-20240229", "claude-3-opus-20240229"),
    ("claude-3-sonnet-20240229", "claude-3-sonnet-20240229"),
    ("claude-3-haiku-20240307", "claude-3-haiku-20240307"),
    ("claude-3-5-sonnet-20241022", "claude-3-5-sonnet-20241022"),
    ("claude-3-5-haiku-20241022", "claude-3-5-haiku-20241022"),
    ("claude-3-opus", DEFAULT_OPUS_MODEL),
    ("claude-3-sonnet", DEFAULT_SONNET_MODEL),
    ("claude-3-haiku", DEFAULT_HAIKU_MODEL),
    ("claude-3.5-sonnet", "claude-3-5-sonnet-20241022"),
    ("claude-3.5-haiku", "claude-3-5-haiku-20241022"),
    ("opus", DEFAULT_OPUS_MODEL),
    ("sonnet", DEFAULT_SONNET_MODEL),
    ("haiku", DEFAULT_HAIKU_MODEL),
];

#[derive(Debug, Clone)]
pub struct ModelAliasTable {
    exact: HashMap<String, String>,
    /// `(lowercased alias, canonical)`, longest alias first.
    patterns: Vec<(String, String)>,
}

impl ModelAliasTable {
    /// Built-in aliases only.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::from_pairs(std::iter::empty::<(String, String)>())
    }

    /// Built-in aliases with `overrides` layered on top.
    #[must_use]
    pub fn from_config(overrides: &HashMap<String, String>) -> Self {
        Self::from_pairs(overrides.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    fn from_pairs<I, K, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut exact: HashMap<String, String> = DEFAULT_ALIASES
            .iter()
            .map(|(alias, canonical)| ((*alias).to_string(), (*canonical).to_string()))
            .collect();

        for (alias, canonical) in overrides {
            exact.insert(alias.into(), canonical.into());
        }

        // Every canonical id maps to itself so a resolved id never resolves further.
        let canonicals: Vec<String> = exact.values().cloned().collect();
        for canonical in canonicals {
            exact.entry(canonical.clone()).or_insert(canonical);
        }

        let mut patterns: Vec<(String, String)> = exact
            .iter()
            .map(|(alias, canonical)| (alias.to_lowercase(), canonical.clone()))
            .collect();
        patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Self { exact, patterns }
    }

    /// Exact match, then case-insensitive substring match, else the input unchanged.
    #[must_use]
    pub fn resolve(&self, model: &str) -> String {
        if let Some(canonical) = self.exact.get(model) {
            return canonical.clone();
        }

        let lowered = model.to_lowercase();
        self.patterns
            .iter()
            .find(|(pattern, _)| lowered.contains(pattern.as_str()))
            .map_or_else(|| model.to_string(), |(_, canonical)| canonical.clone())
    }

    #[must_use]
    pub fn is_known(&self, model: &str) -> bool {
        self.exact.contains_key(model)
    }

    /// All registered aliases, sorted.
    #[must_use]
    pub fn aliases(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exact.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModelAliasTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
