//! Emotion detection request pipeline.
//!
//! One detection walks these states:
//!
//! ```text
//! Received -> ArtifactWritten -> Submitted -> {Completed | TimedOut | Failed}
//!          -> ArtifactReleased -> Responded
//! ```
//!
//! The upload is written to a temporary artifact, the classifier runs on the
//! offload executor, and the caller waits at most the configured timeout.
//! The artifact is released on every exit path. A timed-out classification
//! keeps running on its worker; only the waiting stops.

use crate::artifacts::ArtifactStore;
use crate::classifier::{AnalyzeOptions, CommandClassifier, EmotionClassifier, UnconfiguredClassifier};
use crate::config::MoodscanConfig;
use crate::executor::{ExecutorConfig, OffloadError, OffloadExecutor};
use crate::models::{ClassifierOutput, DetectionResult};
use crate::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error as ThisError;

/// Pipeline states, used as a structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    /// Upload bytes are in memory.
    Received,
    /// Upload is on disk.
    ArtifactWritten,
    /// Classification is queued on the executor.
    Submitted,
    /// Classifier returned a distribution.
    Completed,
    /// Waiting exceeded the timeout.
    TimedOut,
    /// Any other failure.
    Failed,
    /// Artifact deletion attempted.
    ArtifactReleased,
}

impl DetectionState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::ArtifactWritten => "artifact_written",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
            Self::ArtifactReleased => "artifact_released",
        }
    }
}

/// Failures surfaced to the caller as an in-band `{"error": ...}` payload.
///
/// Artifact cleanup failures are not in this list: they are logged by the
/// artifact store and never reach the caller.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum DetectionError {
    /// The upload stream could not be read.
    #[error("Failed to read upload: {0}")]
    UploadRead(String),

    /// The upload could not be written to disk.
    #[error("Failed to store upload: {0}")]
    ArtifactIo(String),

    /// The classifier did not finish in time. Retrying usually works once
    /// the model is loaded.
    #[error(
        "Analysis timed out after {}s. The emotion model may still be loading (first run). Please try again in a moment.",
        .waited.as_secs()
    )]
    Timeout {
        /// How long the request waited.
        waited: Duration,
    },

    /// The classifier failed.
    #[error("Analysis failed: {0}")]
    ClassificationFailure(String),
}

impl DetectionError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UploadRead(_) => "upload_read",
            Self::ArtifactIo(_) => "artifact_io",
            Self::Timeout { .. } => "timeout",
            Self::ClassificationFailure(_) => "classification_failure",
        }
    }
}

impl From<DetectionError> for Error {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::Timeout { waited } => Self::TimedOut {
                operation: "detect_emotion".to_string(),
                elapsed_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            },
            DetectionError::UploadRead(cause) => Self::InvalidInput(cause),
            other => Self::OperationFailed {
                operation: "detect_emotion".to_string(),
                cause: other.to_string(),
            },
        }
    }
}

/// Builds the response payload from raw classifier output.
///
/// A sequence of faces uses the first; a single analysis is used as-is.
/// The classifier's own `dominant_emotion` is trusted, not recomputed.
///
/// # Errors
///
/// Returns [`DetectionError::ClassificationFailure`] when there is no face or
/// the dominant label is missing from the distribution.
pub fn normalize(output: ClassifierOutput) -> Result<DetectionResult, DetectionError> {
    let face = output.into_primary().ok_or_else(|| {
        DetectionError::ClassificationFailure("classifier returned no faces".to_string())
    })?;

    let confidence = face.emotion.get(&face.dominant_emotion).ok_or_else(|| {
        DetectionError::ClassificationFailure(format!(
            "dominant emotion '{}' missing from distribution",
            face.dominant_emotion
        ))
    })?;

    Ok(DetectionResult {
        dominant_emotion: face.dominant_emotion,
        confidence,
        emotions: face.emotion,
    })
}

/// Runs detections: artifact, offload, timeout, normalization.
pub struct EmotionDetector {
    store: ArtifactStore,
    classifier: Arc<dyn EmotionClassifier>,
    executor: OffloadExecutor,
    options: AnalyzeOptions,
    timeout: Duration,
}

impl EmotionDetector {
    /// Creates a detector with default options and timeout.
    #[must_use]
    pub fn new(
        classifier: Arc<dyn EmotionClassifier>,
        store: ArtifactStore,
        executor: OffloadExecutor,
    ) -> Self {
        Self {
            store,
            classifier,
            executor,
            options: AnalyzeOptions::default(),
            timeout: Duration::from_secs(crate::config::DEFAULT_DETECTION_TIMEOUT_SECS),
        }
    }

    /// Builds the detector described by `config`.
    ///
    /// Without a configured classifier command the detector still works, but
    /// every detection fails in-band.
    ///
    /// # Errors
    ///
    /// Returns an error if the offload workers cannot be started.
    pub fn from_config(config: &MoodscanConfig) -> crate::Result<Self> {
        let classifier: Arc<dyn EmotionClassifier> =
            match CommandClassifier::from_config(&config.classifier) {
                Some(command) => Arc::new(command),
                None => {
                    tracing::warn!("No classifier command configured, detections will fail");
                    Arc::new(UnconfiguredClassifier)
                },
            };
        let executor =
            OffloadExecutor::new(ExecutorConfig::new().with_workers(config.detection.workers))?;

        Ok(Self::new(
            classifier,
            ArtifactStore::from_config(&config.artifacts),
            executor,
        )
        .with_options(AnalyzeOptions::from_config(&config.detection))
        .with_timeout(config.detection.timeout))
    }

    /// Sets the wait bound.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the classifier options.
    #[must_use]
    pub fn with_options(mut self, options: AnalyzeOptions) -> Self {
        self.options = options;
        self
    }

    /// Wait bound per detection.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The offload executor.
    #[must_use]
    pub const fn executor(&self) -> &OffloadExecutor {
        &self.executor
    }

    /// Detects the dominant emotion in an uploaded image.
    ///
    /// Empty or undecodable payloads are still handed to the classifier.
    ///
    /// # Errors
    ///
    /// Returns a [`DetectionError`] for storage failures, timeouts, and
    /// classifier failures. The artifact has been released either way.
    pub async fn detect(&self, image: Vec<u8>) -> Result<DetectionResult, DetectionError> {
        let started = Instant::now();
        tracing::info!(
            state = DetectionState::Received.as_str(),
            bytes = image.len(),
            "Received emotion detection request"
        );

        let result = self.run(&image).await;

        let status = match &result {
            Ok(detected) => {
                tracing::info!(
                    dominant = %detected.dominant_emotion,
                    confidence = detected.confidence,
                    "Emotion detected"
                );
                "success"
            },
            Err(err) => {
                tracing::error!(kind = err.kind(), error = %err, "Emotion detection failed");
                err.kind()
            },
        };
        metrics::counter!("detection_requests_total", "status" => status).increment(1);
        metrics::histogram!("detection_duration_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    async fn run(&self, image: &[u8]) -> Result<DetectionResult, DetectionError> {
        let artifact = self.store.acquire(image).map_err(|e| {
            tracing::error!(state = DetectionState::Failed.as_str(), error = %e, "Artifact write failed");
            DetectionError::ArtifactIo(error_cause(&e))
        })?;
        tracing::debug!(
            state = DetectionState::ArtifactWritten.as_str(),
            path = %artifact.path().display()
        );

        let outcome = self.classify(artifact.path()).await;

        self.store.release(artifact);
        tracing::debug!(state = DetectionState::ArtifactReleased.as_str());

        outcome.and_then(normalize)
    }

    async fn classify(&self, path: &Path) -> Result<ClassifierOutput, DetectionError> {
        let classifier = Arc::clone(&self.classifier);
        let path = path.to_path_buf();
        let options = self.options.clone();

        let pending = self
            .executor
            .submit(move || classifier.analyze(&path, &options))
            .map_err(|e| DetectionError::ClassificationFailure(e.to_string()))?;
        tracing::debug!(
            state = DetectionState::Submitted.as_str(),
            classifier = self.classifier.name(),
            queued = self.executor.queued()
        );

        match pending.wait(self.timeout).await {
            Ok(Ok(output)) => {
                tracing::debug!(state = DetectionState::Completed.as_str());
                Ok(output)
            },
            Ok(Err(e)) => {
                tracing::debug!(state = DetectionState::Failed.as_str());
                Err(DetectionError::ClassificationFailure(error_cause(&e)))
            },
            Err(OffloadError::TimedOut { waited }) => {
                tracing::warn!(
                    state = DetectionState::TimedOut.as_str(),
                    waited_secs = waited.as_secs(),
                    "Classification timed out, it keeps running in the background"
                );
                Err(DetectionError::Timeout { waited })
            },
            Err(other) => {
                tracing::debug!(state = DetectionState::Failed.as_str());
                Err(DetectionError::ClassificationFailure(other.to_string()))
            },
        }
    }

    /// Stops the offload workers after the queue drains. Blocks.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }
}

/// Client-facing message for a crate error.
fn error_cause(err: &Error) -> String {
    match err {
        Error::OperationFailed { cause, .. } => cause.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmotionDistribution, FaceAnalysis};
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubClassifier {
        reply: Mutex<Option<crate::Result<ClassifierOutput>>>,
        delay: Duration,
        seen_paths: Mutex<Vec<std::path::PathBuf>>,
        calls: AtomicUsize,
    }

    impl StubClassifier {
        fn new(reply: crate::Result<ClassifierOutput>, delay: Duration) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                delay,
                seen_paths: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmotionClassifier for StubClassifier {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn analyze(&self, image: &Path, _options: &AnalyzeOptions) -> crate::Result<ClassifierOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(image.exists(), "artifact should exist while classifying");
            self.seen_paths.lock().unwrap().push(image.to_path_buf());
            std::thread::sleep(self.delay);
            self.reply.lock().unwrap().take().unwrap()
        }
    }

    fn face(dominant: &str, scores: &[(&str, f64)]) -> FaceAnalysis {
        FaceAnalysis {
            dominant_emotion: dominant.to_string(),
            emotion: scores.iter().map(|(l, s)| (*l, *s)).collect(),
        }
    }

    fn detector(stub: Arc<StubClassifier>, dir: &TempDir, timeout: Duration) -> EmotionDetector {
        EmotionDetector::new(
            stub,
            ArtifactStore::new(dir.path()),
            OffloadExecutor::new(ExecutorConfig::default()).unwrap(),
        )
        .with_timeout(timeout)
    }

    fn dir_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[test]
    fn test_normalize_single() {
        let output = ClassifierOutput::Single(face("happy", &[("happy", 92.0), ("sad", 8.0)]));
        let result = normalize(output).unwrap();
        assert_eq!(result.dominant_emotion, "happy");
        assert!((result.confidence - 92.0).abs() < f64::EPSILON);
        assert_eq!(result.emotions.len(), 2);
    }

    #[test]
    fn test_normalize_uses_first_face() {
        let output = ClassifierOutput::Faces(vec![
            face("sad", &[("sad", 70.0), ("happy", 30.0)]),
            face("happy", &[("happy", 99.0)]),
        ]);
        let result = normalize(output).unwrap();
        assert_eq!(result.dominant_emotion, "sad");
        assert!((result.confidence - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalize_trusts_classifier_choice() {
        // Not the arg-max, but the classifier said so.
        let output = ClassifierOutput::Single(face("neutral", &[("happy", 60.0), ("neutral", 40.0)]));
        assert_eq!(normalize(output).unwrap().dominant_emotion, "neutral");
    }

    #[test]
    fn test_normalize_empty_faces_fails() {
        let err = normalize(ClassifierOutput::Faces(vec![])).unwrap_err();
        assert!(matches!(err, DetectionError::ClassificationFailure(_)));
    }

    #[test]
    fn test_normalize_missing_dominant_fails() {
        let output = ClassifierOutput::Single(face("fear", &[("happy", 100.0)]));
        let err = normalize(output).unwrap_err();
        assert!(err.to_string().contains("'fear' missing"));
    }

    proptest! {
        #[test]
        fn prop_confidence_matches_distribution(
            scores in proptest::collection::vec(0.0f64..100.0, 1..7),
            pick in any::<prop::sample::Index>(),
        ) {
            let labels = ["angry", "disgust", "fear", "happy", "sad", "surprise", "neutral"];
            let dist: EmotionDistribution = labels.iter().copied().zip(scores.iter().copied()).collect();
            let dominant = labels[pick.index(dist.len())];
            let output = ClassifierOutput::Single(FaceAnalysis {
                dominant_emotion: dominant.to_string(),
                emotion: dist,
            });

            let result = normalize(output).unwrap();
            prop_assert!(result.emotions.contains(&result.dominant_emotion));
            prop_assert_eq!(result.emotions.get(&result.dominant_emotion), Some(result.confidence));
        }
    }

    #[tokio::test]
    async fn test_detect_success_releases_artifact() {
        let dir = TempDir::new().unwrap();
        let stub = Arc::new(StubClassifier::new(
            Ok(ClassifierOutput::Single(face("happy", &[("happy", 80.0), ("sad", 20.0)]))),
            Duration::ZERO,
        ));
        let detector = detector(Arc::clone(&stub), &dir, Duration::from_secs(5));

        let result = detector.detect(b"jpeg".to_vec()).await.unwrap();
        assert_eq!(result.dominant_emotion, "happy");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_detect_failure_carries_message() {
        let dir = TempDir::new().unwrap();
        let stub = Arc::new(StubClassifier::new(
            Err(Error::OperationFailed {
                operation: "classify".to_string(),
                cause: "Face could not be detected".to_string(),
            }),
            Duration::ZERO,
        ));
        let detector = detector(stub, &dir, Duration::from_secs(5));

        let err = detector.detect(Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Analysis failed: Face could not be detected");
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_detect_timeout_releases_artifact() {
        let dir = TempDir::new().unwrap();
        let stub = Arc::new(StubClassifier::new(
            Ok(ClassifierOutput::Single(face("happy", &[("happy", 1.0)]))),
            Duration::from_millis(400),
        ));
        let detector = detector(Arc::clone(&stub), &dir, Duration::from_millis(50));

        let started = Instant::now();
        let err = detector.detect(b"jpeg".to_vec()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, DetectionError::Timeout { .. }));
        assert!(err.to_string().contains("timed out"));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(350));
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_detect_after_shutdown_fails_in_band() {
        let dir = TempDir::new().unwrap();
        let stub = Arc::new(StubClassifier::new(
            Ok(ClassifierOutput::Single(face("happy", &[("happy", 1.0)]))),
            Duration::ZERO,
        ));
        let detector = detector(Arc::clone(&stub), &dir, Duration::from_secs(5));

        detector.shutdown();
        let err = detector.detect(b"jpeg".to_vec()).await.unwrap_err();

        assert_eq!(err.kind(), "classification_failure");
        assert!(err.to_string().contains("shut down"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(dir_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_detect_artifact_failure() {
        let dir = TempDir::new().unwrap();
        let stub = Arc::new(StubClassifier::new(
            Ok(ClassifierOutput::Faces(vec![])),
            Duration::ZERO,
        ));
        let detector = EmotionDetector::new(
            Arc::clone(&stub) as Arc<dyn EmotionClassifier>,
            ArtifactStore::new(dir.path().join("missing")),
            OffloadExecutor::new(ExecutorConfig::default()).unwrap(),
        );

        let err = detector.detect(b"jpeg".to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), "artifact_io");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timeout_converts_to_crate_error() {
        let err: Error = DetectionError::Timeout {
            waited: Duration::from_secs(60),
        }
        .into();
        assert!(matches!(err, Error::TimedOut { elapsed_ms: 60_000, .. }));
    }
}
