//! Configuration types.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header produces a working
//! configuration.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage key layout.
    pub keys: KeyConfig,
    /// Audit scan tuning.
    pub audit: AuditConfig,
    /// Repair batching and rebuild policy.
    pub repair: RepairConfig,
    /// Logging level and format.
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// KeyConfig
// ---------------------------------------------------------------------------

/// How storage keys are assembled.
///
/// A primary record lives at `<type><delimiter><id><delimiter><suffix>` and
/// a model's timeline at `<type><delimiter><instances>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Separator between key segments.
    pub delimiter: String,
    /// Trailing segment of primary record keys.
    pub suffix: String,
    /// Trailing segment of timeline keys.
    pub instances: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            delimiter: ":".to_owned(),
            suffix: "object".to_owned(),
            instances: "instances".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditConfig
// ---------------------------------------------------------------------------

/// Audit scan settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Keys examined per `SCAN` call.
    pub batch_size: usize,
    /// Members sampled from a multi-index set larger than this.
    pub sample_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            sample_size: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// RepairConfig
// ---------------------------------------------------------------------------

/// Repair settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Commands per pipeline when fixing the timeline.
    pub batch_size: usize,
    /// Stale entries above which an index is rebuilt instead of patched.
    pub rebuild_threshold: usize,
    /// Always rebuild indexes, regardless of the threshold.
    pub force_rebuild: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            rebuild_threshold: 10,
            force_rebuild: false,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingConfig
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["kinship_core=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
            directives: Vec::new(),
        }
    }
}
