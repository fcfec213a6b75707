//! Assessment session records.

use serde::{Deserialize, Serialize};

/// One saved assessment session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Display name of the person assessed.
    pub name: String,
    /// Emotion recorded for the session.
    pub emotion: String,
    /// Overall stress score.
    pub stress_score: f64,
}

impl SessionRecord {
    /// Creates a new session record.
    #[must_use]
    pub fn new(name: impl Into<String>, emotion: impl Into<String>, stress_score: f64) -> Self {
        Self {
            name: name.into(),
            emotion: emotion.into(),
            stress_score,
        }
    }
}
