//! Settings that steer reads, writes, evaluations and waits.
//!
//! All settings are plain data with `Default`, serde support and `with_*`
//! builders, so an agent can keep them in a JSON config file and load them
//! with `from_json`.

use serde::{Deserialize, Serialize};

use crate::error::KarlResult;

/// Logical stamp attached to an update received from another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStamp {
    /// Clock of the sender's record.
    pub clock: u64,
    /// Quality of the sender's record.
    pub quality: u32,
}

/// Settings for variable lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeReferenceSettings {
    /// Expand `{name}` segments of a variable name before the lookup.
    pub expand_variables: bool,
}

impl KnowledgeReferenceSettings {
    /// Settings with variable-name expansion enabled.
    #[must_use]
    pub fn expanding() -> Self {
        Self {
            expand_variables: true,
        }
    }
}

/// Settings for writes into a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeUpdateSettings {
    /// Never flag written variables as modified, so they are never sent.
    pub treat_as_local: bool,
    /// Flag `.`-prefixed locals as modified like any global.
    pub treat_locals_as_globals: bool,
    /// How far the context clock advances per local write.
    pub clock_increment: u64,
    /// Present when the write carries an update received from another process.
    pub remote: Option<RemoteStamp>,
    /// Expand `{name}` segments of variable names before writing.
    pub expand_variables: bool,
}

impl Default for KnowledgeUpdateSettings {
    fn default() -> Self {
        Self {
            treat_as_local: false,
            treat_locals_as_globals: false,
            clock_increment: 1,
            remote: None,
            expand_variables: false,
        }
    }
}

impl KnowledgeUpdateSettings {
    /// Settings whose writes never propagate.
    #[must_use]
    pub fn local() -> Self {
        Self {
            treat_as_local: true,
            ..Self::default()
        }
    }

    /// Settings for applying an update received from another process.
    #[must_use]
    pub fn remote(clock: u64, quality: u32) -> Self {
        Self {
            remote: Some(RemoteStamp { clock, quality }),
            ..Self::default()
        }
    }

    /// Keeps writes out of the modified set.
    #[must_use]
    pub fn with_treat_as_local(mut self, treat_as_local: bool) -> Self {
        self.treat_as_local = treat_as_local;
        self
    }

    /// Sends `.`-prefixed variables too.
    #[must_use]
    pub fn with_treat_locals_as_globals(mut self, treat_locals_as_globals: bool) -> Self {
        self.treat_locals_as_globals = treat_locals_as_globals;
        self
    }

    /// Amount each write advances the clock.
    #[must_use]
    pub fn with_clock_increment(mut self, clock_increment: u64) -> Self {
        self.clock_increment = clock_increment;
        self
    }

    /// The reference settings implied by these update settings.
    #[must_use]
    pub fn reference(&self) -> KnowledgeReferenceSettings {
        KnowledgeReferenceSettings {
            expand_variables: self.expand_variables,
        }
    }
}

/// Settings for one evaluation of an expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSettings {
    /// Write behaviour for assignments inside the expression.
    pub update: KnowledgeUpdateSettings,
    /// Keep modifications queued instead of handing them to transports.
    pub delay_sending_modifieds: bool,
    /// Statement expanded and logged before evaluation, if non-empty.
    pub pre_print_statement: String,
    /// Statement expanded and logged after evaluation, if non-empty.
    pub post_print_statement: String,
}

impl EvalSettings {
    /// Settings whose writes never propagate.
    #[must_use]
    pub fn local() -> Self {
        Self {
            update: KnowledgeUpdateSettings::local(),
            ..Self::default()
        }
    }

    /// Sets the per-write settings.
    #[must_use]
    pub fn with_update(mut self, update: KnowledgeUpdateSettings) -> Self {
        self.update = update;
        self
    }

    /// Holds modifications until an explicit send.
    #[must_use]
    pub fn with_delay_sending_modifieds(mut self, delay: bool) -> Self {
        self.delay_sending_modifieds = delay;
        self
    }

    /// Statement expanded and printed before evaluation.
    #[must_use]
    pub fn with_pre_print(mut self, statement: impl Into<String>) -> Self {
        self.pre_print_statement = statement.into();
        self
    }

    /// Statement expanded and printed after evaluation.
    #[must_use]
    pub fn with_post_print(mut self, statement: impl Into<String>) -> Self {
        self.post_print_statement = statement.into();
        self
    }

    /// Parse settings from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> KarlResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Settings for a blocking wait on a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    /// Settings applied to each evaluation of the predicate.
    pub eval: EvalSettings,
    /// Seconds between re-evaluations. Zero or less waits for change
    /// notifications instead of polling.
    pub poll_frequency: f64,
    /// Seconds before giving up. Negative waits forever.
    pub max_wait_time: f64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            eval: EvalSettings::default(),
            poll_frequency: 0.010,
            max_wait_time: -1.0,
        }
    }
}

impl WaitSettings {
    /// Default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the settings used for each evaluation.
    #[must_use]
    pub fn with_eval(mut self, eval: EvalSettings) -> Self {
        self.eval = eval;
        self
    }

    /// Seconds between polls; 0 or less waits on change notification.
    #[must_use]
    pub fn with_poll_frequency(mut self, seconds: f64) -> Self {
        self.poll_frequency = seconds;
        self
    }

    /// Seconds before giving up; negative waits forever.
    #[must_use]
    pub fn with_max_wait_time(mut self, seconds: f64) -> Self {
        self.max_wait_time = seconds;
        self
    }

    /// Parse settings from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> KarlResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Construction-time configuration of a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseConfig {
    /// Identifier stamped on outgoing batches. A random one is generated when absent.
    pub id: Option<String>,
    /// Per-subscription buffer of the change feed.
    pub change_feed_capacity: usize,
    /// Maximum nesting of user-defined function calls.
    pub max_call_depth: usize,
    /// Largest array an indexed assignment may grow a variable to.
    pub max_array_size: usize,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            id: None,
            change_feed_capacity: 1024,
            max_call_depth: 128,
            max_array_size: 1 << 20,
        }
    }
}

impl KnowledgeBaseConfig {
    /// Sets the identifier stamped on outgoing batches.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parse a config from JSON; missing fields keep their defaults.
    pub fn from_json(json: &str) -> KarlResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_defaults() {
        let settings = WaitSettings::default();
        assert!((settings.poll_frequency - 0.010).abs() < f64::EPSILON);
        assert!(settings.max_wait_time < 0.0);
        assert!(!settings.eval.update.treat_as_local);
        assert_eq!(settings.eval.update.clock_increment, 1);
    }

    #[test]
    fn test_wait_from_json_partial() {
        let settings = WaitSettings::from_json(r#"{"max_wait_time": 0.2}"#).unwrap();
        assert!((settings.max_wait_time - 0.2).abs() < f64::EPSILON);
        assert!((settings.poll_frequency - 0.010).abs() < f64::EPSILON);
    }

    #[test]
    fn test_eval_from_json_nested() {
        let settings = EvalSettings::from_json(
            r#"{"update": {"treat_as_local": true}, "pre_print_statement": "x={x}"}"#,
        )
        .unwrap();
        assert!(settings.update.treat_as_local);
        assert_eq!(settings.update.clock_increment, 1);
        assert_eq!(settings.pre_print_statement, "x={x}");
    }

    #[test]
    fn test_config_from_json_partial() {
        let config = KnowledgeBaseConfig::from_json(r#"{"max_array_size": 64}"#).unwrap();
        assert_eq!(config.max_array_size, 64);
        assert_eq!(config.max_call_depth, 128);
        assert_eq!(KnowledgeBaseConfig::default().max_array_size, 1 << 20);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = KnowledgeBaseConfig::from_json("{").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_remote_settings() {
        let settings = KnowledgeUpdateSettings::remote(9, 3);
        assert_eq!(settings.remote, Some(RemoteStamp { clock: 9, quality: 3 }));
    }

    #[test]
    fn test_builders() {
        let settings = WaitSettings::new()
            .with_poll_frequency(0.05)
            .with_max_wait_time(1.0)
            .with_eval(EvalSettings::local().with_post_print("done"));
        assert!(settings.eval.update.treat_as_local);
        assert_eq!(settings.eval.post_print_statement, "done");
    }
}
