//! Runtime configuration of the reasoner.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How fresh values for existential head variables are reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChaseStrategy {
    /// One value per rule, variable and frontier substitution
    #[default]
    Skolem,
    /// Like [`ChaseStrategy::Skolem`], but no value is minted when the head
    /// is already satisfied by an existing fact
    Restricted,
}

/// Tuning knobs for the fixpoint driver and the join engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReasonerConfig {
    /// Size of the worker pool; `1` runs everything inline
    pub threads: usize,
    /// The selective hash join is used for left sides with fewer rows
    pub hash_join_threshold: usize,
    /// A single join key with fewer distinct left values than this is joined
    /// by bucketing instead of sorting
    pub low_cardinality_threshold: usize,
    /// Row count above which sorting fans out to the pool
    pub parallel_sort_threshold: usize,
    /// Wall-clock limit, checked between rule firings
    pub timeout: Option<Duration>,
    /// Existential value reuse policy
    pub chase: ChaseStrategy,
    /// Drop derivations equal to facts read by the last body literal
    pub filter_self_derivations: bool,
    /// Probe the EDB layer by key batch for verificative joins
    pub key_lookup: bool,
    /// Sort and deduplicate every intermediate segment
    pub dedup_intermediate: bool,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_join_threshold: 100,
            low_cardinality_threshold: 20,
            parallel_sort_threshold: 1 << 16,
            timeout: None,
            chase: ChaseStrategy::Skolem,
            filter_self_derivations: true,
            key_lookup: true,
            dedup_intermediate: true,
        }
    }
}

impl ReasonerConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker pool size (values below 1 are treated as 1)
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Sets the wall-clock timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the chase strategy
    #[must_use]
    pub fn with_chase(mut self, chase: ChaseStrategy) -> Self {
        self.chase = chase;
        self
    }

    /// Sets the hash join threshold
    #[must_use]
    pub fn with_hash_join_threshold(mut self, rows: usize) -> Self {
        self.hash_join_threshold = rows;
        self
    }

    /// Sets the parallel sort threshold
    #[must_use]
    pub fn with_parallel_sort_threshold(mut self, rows: usize) -> Self {
        self.parallel_sort_threshold = rows;
        self
    }

    /// Enables or disables the self-derivation filter
    #[must_use]
    pub fn with_self_filter(mut self, enabled: bool) -> Self {
        self.filter_self_derivations = enabled;
        self
    }

    /// Enables or disables key-batch probing of the EDB layer
    #[must_use]
    pub fn with_key_lookup(mut self, enabled: bool) -> Self {
        self.key_lookup = enabled;
        self
    }

    /// Reads a configuration from a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ReasonerError::Config`] when the document is not valid.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.threads = config.threads.max(1);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReasonerConfig::default();
        assert_eq!(config.threads, 1);
        assert_eq!(config.hash_join_threshold, 100);
        assert_eq!(config.low_cardinality_threshold, 20);
        assert!(config.timeout.is_none());
        assert_eq!(config.chase, ChaseStrategy::Skolem);
    }

    #[test]
    fn test_builder_clamps_threads() {
        let config = ReasonerConfig::new().with_threads(0);
        assert_eq!(config.threads, 1, "Thread count must never drop below one");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_from_json_keeps_defaults_for_missing_fields() {
        let config = ReasonerConfig::from_json(r#"{"threads": 4, "chase": "restricted"}"#)
            .expect("valid config");
        assert_eq!(config.threads, 4);
        assert_eq!(config.chase, ChaseStrategy::Restricted);
        assert_eq!(config.hash_join_threshold, 100);
        assert!(config.dedup_intermediate);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(ReasonerConfig::from_json("{threads: }").is_err());
    }
}
