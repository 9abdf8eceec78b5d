//! Thread-safe round-robin model rotator.
//!
//! Summarization traffic spreads across a pool of (provider, model)
//! configs: every `calls_per_model` calls the pointer advances, and a
//! provider failure forces an immediate rotation so retries land on a
//! different backend.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::ConfigError;

#[derive(Debug)]
struct RotatorState {
    index: usize,
    calls: u32,
}

/// Round-robin rotator over an ordered list of model configs.
///
/// Both operations take one lock, so observers always see a consistent
/// `(pointer, counter)` snapshot. Neither blocks beyond the mutex.
#[derive(Debug)]
pub struct ModelRotator {
    configs: Vec<ModelConfig>,
    calls_per_model: u32,
    state: Mutex<RotatorState>,
}

impl ModelRotator {
    /// Creates a rotator over `configs`, advancing after `calls_per_model`
    /// calls.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyModelPool`] for an empty config list.
    pub fn new(configs: Vec<ModelConfig>, calls_per_model: u32) -> Result<Self, ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::EmptyModelPool);
        }
        Ok(Self {
            configs,
            calls_per_model: calls_per_model.max(1),
            state: Mutex::new(RotatorState { index: 0, calls: 0 }),
        })
    }

    /// Returns the current config and advances the counter; rotates after
    /// `calls_per_model` calls.
    #[must_use]
    pub fn next(&self) -> ModelConfig {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let config = self.configs[state.index % self.configs.len()].clone();
        state.calls += 1;
        if state.calls >= self.calls_per_model {
            state.calls = 0;
            state.index = (state.index + 1) % self.configs.len();
            debug!(
                index = state.index,
                total = self.configs.len(),
                "rotating to next model"
            );
        }
        config
    }

    /// Immediately advances to the next model and resets the counter.
    /// Used on provider failure.
    pub fn force_rotate(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.calls = 0;
        state.index = (state.index + 1) % self.configs.len();
        let next = &self.configs[state.index];
        warn!(
            index = state.index,
            total = self.configs.len(),
            provider = %next.provider,
            model = %next.model_id,
            "forced model rotation after failure"
        );
    }

    /// Number of models in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Whether the pool is empty (never true after construction).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn model(id: &str) -> ModelConfig {
        ModelConfig {
            provider: "groq".to_string(),
            model_id: id.to_string(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    fn rotator(ids: &[&str], calls_per_model: u32) -> ModelRotator {
        ModelRotator::new(ids.iter().map(|id| model(id)).collect(), calls_per_model).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            ModelRotator::new(Vec::new(), 3),
            Err(ConfigError::EmptyModelPool)
        ));
    }

    #[test]
    fn test_rotates_after_quota() {
        let r = rotator(&["a", "b"], 2);
        assert_eq!(r.next().model_id, "a");
        assert_eq!(r.next().model_id, "a");
        assert_eq!(r.next().model_id, "b");
        assert_eq!(r.next().model_id, "b");
        assert_eq!(r.next().model_id, "a");
    }

    #[test]
    fn test_calls_per_model_one_rotates_every_call() {
        let r = rotator(&["a", "b", "c"], 1);
        let seen: Vec<String> = (0..4).map(|_| r.next().model_id).collect();
        assert_eq!(seen, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_force_rotate_resets_counter() {
        let r = rotator(&["a", "b"], 3);
        assert_eq!(r.next().model_id, "a");
        r.force_rotate();
        // Counter was reset: "b" now serves a full quota.
        assert_eq!(r.next().model_id, "b");
        assert_eq!(r.next().model_id, "b");
        assert_eq!(r.next().model_id, "b");
        assert_eq!(r.next().model_id, "a");
    }

    #[test]
    fn test_single_model_pool() {
        let r = rotator(&["only"], 1);
        assert_eq!(r.next().model_id, "only");
        r.force_rotate();
        assert_eq!(r.next().model_id, "only");
        assert_eq!(r.len(), 1);
        assert!(!r.is_empty());
    }

    #[test]
    fn test_concurrent_snapshot_consistency() {
        let r = std::sync::Arc::new(rotator(&["a", "b", "c"], 1));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let r = std::sync::Arc::clone(&r);
            handles.push(std::thread::spawn(move || {
                for _ in 0..30 {
                    let config = r.next();
                    assert!(["a", "b", "c"].contains(&config.model_id.as_str()));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // 120 calls at 1 call/model over 3 models: pointer back at start.
        assert_eq!(r.next().model_id, "a");
    }
}
