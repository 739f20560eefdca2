//! Compiler limits and parse cache settings.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_EMBED_DEPTH: usize = 8;
pub const DEFAULT_MAX_FILTER_DEPTH: usize = 32;
pub const DEFAULT_MAX_CONDITIONS: usize = 100;
pub const DEFAULT_MAX_LIMIT: u64 = 1000;

/// Limits applied while parsing and compiling a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Maximum nesting of embedded resources in a select.
    pub max_embed_depth: usize,
    /// Maximum nesting of parentheses and `not` in a filter.
    pub max_filter_depth: usize,
    /// Maximum number of comparisons in a filter.
    pub max_conditions: usize,
    pub max_limit: u64,
    /// Limit applied to selects that do not specify one.
    pub default_limit: Option<u64>,
    /// Reject UPDATE and DELETE without a user filter.
    pub require_filter_for_mutations: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_embed_depth: DEFAULT_MAX_EMBED_DEPTH,
            max_filter_depth: DEFAULT_MAX_FILTER_DEPTH,
            max_conditions: DEFAULT_MAX_CONDITIONS,
            max_limit: DEFAULT_MAX_LIMIT,
            default_limit: None,
            require_filter_for_mutations: true,
        }
    }
}

impl CompilerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_embed_depth == 0 {
            return Err("compiler.max_embed_depth must be > 0".into());
        }
        if self.max_filter_depth == 0 {
            return Err("compiler.max_filter_depth must be > 0".into());
        }
        if self.max_conditions == 0 {
            return Err("compiler.max_conditions must be > 0".into());
        }
        if self.max_limit == 0 {
            return Err("compiler.max_limit must be > 0".into());
        }
        if let Some(limit) = self.default_limit
            && limit > self.max_limit
        {
            return Err(format!(
                "compiler.default_limit ({limit}) must not exceed compiler.max_limit ({})",
                self.max_limit
            ));
        }
        Ok(())
    }
}

/// Parse cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    /// Entries older than this are evicted.
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1000,
            max_age_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = CompilerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_embed_depth, 8);
        assert!(cfg.require_filter_for_mutations);
    }

    #[test]
    fn test_default_limit_above_max_rejected() {
        let cfg = CompilerConfig {
            default_limit: Some(5000),
            ..Default::default()
        };
        assert!(cfg.validate().unwrap_err().contains("default_limit"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: CompilerConfig = toml::from_str("max_limit = 50").unwrap();
        assert_eq!(cfg.max_limit, 50);
        assert_eq!(cfg.max_conditions, DEFAULT_MAX_CONDITIONS);

        let cache: CacheConfig = toml::from_str("enabled = false").unwrap();
        assert!(!cache.enabled);
        assert_eq!(cache.capacity, 1000);
    }
}
