//! # Moodscan
//!
//! Facial emotion detection over HTTP.
//!
//! Moodscan accepts an uploaded image, hands it to an external emotion
//! classifier on a dedicated worker, and answers with the dominant emotion
//! plus the full confidence distribution. It also keeps an in-memory register
//! of assessment sessions and answers wellness questions from a canned rule
//! table.
//!
//! ## Features
//!
//! - Single-worker offload: at most one classification runs at a time
//! - Timeouts that stop waiting without killing the running classification
//! - Temporary upload artifacts that are always cleaned up
//! - In-band JSON errors compatible with the browser client
//!
//! ## Example
//!
//! ```rust,ignore
//! use moodscan::{EmotionDetector, MoodscanConfig};
//!
//! let config = MoodscanConfig::load_default();
//! let detector = EmotionDetector::from_config(&config)?;
//! let result = detector.detect(std::fs::read("face.jpg")?).await?;
//! println!("{} ({:.1}%)", result.dominant_emotion, result.confidence);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod executor;
pub mod http;
pub mod models;
pub mod observability;
pub mod sessions;
pub mod wellness;

// Re-exports for convenience
pub use artifacts::{ArtifactStore, TemporaryArtifact};
pub use classifier::{AnalyzeOptions, CommandClassifier, EmotionClassifier};
pub use config::MoodscanConfig;
pub use detection::{DetectionError, EmotionDetector};
pub use executor::{OffloadExecutor, OffloadError, PendingJob};
pub use http::HttpServer;
pub use models::{
    ChatMessage, ChatReply, ChatRequest, ClassifierOutput, DetectionResult, EmotionDistribution,
    FaceAnalysis, SessionRecord,
};
pub use sessions::SessionRegister;
pub use wellness::WellnessResponder;

/// Error type for moodscan operations outside the per-request detection path.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed configuration values, bad form fields, empty chat history |
/// | `OperationFailed` | I/O errors, classifier process failures, server bind/serve failures |
/// | `TimedOut` | A bounded wait elapsed before the operation finished |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - The classifier command cannot be spawned or exits non-zero
    /// - The classifier prints output that is not a face analysis
    /// - Config files cannot be read or parsed
    /// - The HTTP listener cannot bind
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A bounded wait elapsed.
    #[error("operation '{operation}' timed out after {elapsed_ms}ms")]
    TimedOut {
        /// The operation that timed out.
        operation: String,
        /// How long the caller waited.
        elapsed_ms: u64,
    },
}

/// Result type alias for moodscan operations.
pub type Result<T> = std::result::Result<T, Error>;
