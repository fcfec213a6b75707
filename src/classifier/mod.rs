//! Emotion classification capability.
//!
//! The classifier is opaque: given a path to image bytes it produces an
//! emotion distribution, synchronously, with unpredictable latency (the
//! first call may spend a long time loading a model). Implementations are
//! called from the offload worker, never from an async task.

mod command;

pub use command::CommandClassifier;

use crate::config::DetectionConfig;
use crate::models::ClassifierOutput;
use crate::{Error, Result};
use std::path::Path;

/// Options forwarded to the classifier on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeOptions {
    /// Analyses to run. Only `emotion` is used by moodscan.
    pub actions: Vec<String>,
    /// When false, images with no clearly detectable face still produce a
    /// best-effort distribution instead of an error.
    pub enforce_detection: bool,
    /// Face detector backend name.
    pub detector_backend: String,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            actions: vec!["emotion".to_string()],
            enforce_detection: false,
            detector_backend: "opencv".to_string(),
        }
    }
}

impl AnalyzeOptions {
    /// Builds options from detection configuration.
    #[must_use]
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            enforce_detection: config.enforce_detection,
            detector_backend: config.detector_backend.clone(),
            ..Self::default()
        }
    }
}

/// Trait for emotion classifiers.
///
/// Errors carry a human-readable message that is passed through to the
/// client.
pub trait EmotionClassifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Classifies the image at `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be analyzed.
    fn analyze(&self, image: &Path, options: &AnalyzeOptions) -> Result<ClassifierOutput>;
}

/// Placeholder used when no classifier command is configured.
///
/// The service still starts; every detection fails in-band.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredClassifier;

impl EmotionClassifier for UnconfiguredClassifier {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    fn analyze(&self, _image: &Path, _options: &AnalyzeOptions) -> Result<ClassifierOutput> {
        Err(Error::OperationFailed {
            operation: "classify".to_string(),
            cause: "classifier not configured (set classifier.command or MOODSCAN_CLASSIFIER_COMMAND)"
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_relax_detection() {
        let options = AnalyzeOptions::default();
        assert_eq!(options.actions, vec!["emotion"]);
        assert!(!options.enforce_detection);
        assert_eq!(options.detector_backend, "opencv");
    }

    #[test]
    fn test_options_from_config() {
        let config = DetectionConfig {
            enforce_detection: true,
            detector_backend: "retinaface".to_string(),
            ..DetectionConfig::default()
        };
        let options = AnalyzeOptions::from_config(&config);
        assert!(options.enforce_detection);
        assert_eq!(options.detector_backend, "retinaface");
        assert_eq!(options.actions, vec!["emotion"]);
    }

    #[test]
    fn test_unconfigured_classifier_fails() {
        let err = UnconfiguredClassifier
            .analyze(Path::new("/tmp/x.jpg"), &AnalyzeOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("classifier not configured"));
    }
}
