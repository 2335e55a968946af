// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as URL schemes, positive intervals, and window bounds.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::TallyConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &TallyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    check_url(&config.backend.base_url, "backend.base_url", &mut fail);
    if let Some(url) = &config.handler.server_url {
        check_url(url, "handler.server_url", &mut fail);
    }

    let engine = &config.engine;
    if engine.poll_interval_secs == 0 {
        fail("engine.poll_interval_secs must be greater than 0".to_string());
    }

    if !(engine.similarity_threshold > 0.0 && engine.similarity_threshold <= 1.0) {
        fail(format!(
            "engine.similarity_threshold must be in (0, 1], got {}",
            engine.similarity_threshold
        ));
    }

    if engine.burst_keep == 0 || engine.burst_keep > engine.burst_limit {
        fail(format!(
            "engine.burst_keep must be between 1 and burst_limit ({}), got {}",
            engine.burst_limit, engine.burst_keep
        ));
    }

    if engine.reconcile_min_window == 0 || engine.reconcile_min_window > engine.reconcile_window {
        fail(format!(
            "engine.reconcile_min_window must be between 1 and reconcile_window ({}), got {}",
            engine.reconcile_window, engine.reconcile_min_window
        ));
    }

    if engine.seed_max_attempts < 1 {
        fail("engine.seed_max_attempts must be at least 1".to_string());
    }

    if !(1..=60).contains(&engine.time_bucket_minutes) {
        fail(format!(
            "engine.time_bucket_minutes must be between 1 and 60, got {}",
            engine.time_bucket_minutes
        ));
    }

    if config.backend.max_attempts < 1 {
        fail("backend.max_attempts must be at least 1".to_string());
    }

    // Duplicate or blank target names.
    let mut seen = HashSet::new();
    for (i, target) in engine.targets.iter().enumerate() {
        if target.trim().is_empty() {
            fail(format!("engine.targets[{i}] must not be empty"));
        } else if !seen.insert(target.as_str()) {
            fail(format!("duplicate target `{target}` in engine.targets"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(url: &str, key: &str, fail: &mut impl FnMut(String)) {
    let url = url.trim();
    if url.is_empty() {
        fail(format!("{key} must not be empty"));
    } else if !(url.starts_with("http://") || url.starts_with("https://")) {
        fail(format!("{key} `{url}` must start with http:// or https://"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &TallyConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn default_config_validates() {
        let config = TallyConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = TallyConfig::default();
        config.storage.database_path = "".to_string();
        assert!(messages(&config).iter().any(|m| m.contains("database_path")));
    }

    #[test]
    fn bad_url_scheme_fails_validation() {
        let mut config = TallyConfig::default();
        config.backend.base_url = "localhost:5000".to_string();
        config.handler.server_url = Some("ftp://books".to_string());
        let msgs = messages(&config);
        assert!(msgs.iter().any(|m| m.contains("backend.base_url")));
        assert!(msgs.iter().any(|m| m.contains("handler.server_url")));
    }

    #[test]
    fn threshold_and_window_bounds() {
        let mut config = TallyConfig::default();
        config.engine.similarity_threshold = 1.5;
        config.engine.burst_keep = 11;
        config.engine.reconcile_min_window = 30;
        config.engine.time_bucket_minutes = 0;
        let msgs = messages(&config);
        assert_eq!(msgs.len(), 4, "got: {msgs:?}");
    }

    #[test]
    fn duplicate_targets_rejected() {
        let mut config = TallyConfig::default();
        config.engine.targets = vec!["family".into(), "family".into(), " ".into()];
        let msgs = messages(&config);
        assert!(msgs.iter().any(|m| m.contains("duplicate target `family`")));
        assert!(msgs.iter().any(|m| m.contains("engine.targets[2]")));
    }
}
