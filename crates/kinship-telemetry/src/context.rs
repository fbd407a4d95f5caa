//! Run context for correlating the log lines of one audit or repair pass.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Context carried through a single engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// Process-unique run identifier.
    pub run_id: u64,
    /// Operation being performed (`"audit"`, `"repair"`, ...).
    pub operation: String,
    /// Model type the run is scoped to, if any.
    pub model: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Additional metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RunContext {
    /// Create a new run context.
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            run_id: NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed),
            operation: operation.into(),
            model: None,
            started_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Scope the run to a model type.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Add metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Elapsed time since the run started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed().num_milliseconds()
    }

    /// Create a tracing span with this context.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "run",
            run_id = self.run_id,
            operation = %self.operation,
            model = self.model.as_deref(),
        )
    }
}
