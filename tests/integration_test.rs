//! Integration tests for moodscan.
#![allow(clippy::unwrap_used, clippy::panic)]

use moodscan::config::MoodscanConfig;
use moodscan::detection::{DetectionError, normalize};
use moodscan::models::{ClassifierOutput, DetectionResult};
use moodscan::{EmotionDetector, Error};
use std::time::Duration;

#[test]
fn test_error_types() {
    let err = Error::InvalidInput("test message".to_string());
    let display = format!("{err}");
    assert!(display.contains("invalid input"));
    assert!(display.contains("test message"));

    let err = Error::OperationFailed {
        operation: "read".to_string(),
        cause: "file not found".to_string(),
    };
    let display = format!("{err}");
    assert!(display.contains("read"));
    assert!(display.contains("file not found"));

    let err = Error::TimedOut {
        operation: "detect_emotion".to_string(),
        elapsed_ms: 1500,
    };
    assert!(format!("{err}").contains("1500ms"));
}

#[test]
fn test_detection_error_messages() {
    let timeout = DetectionError::Timeout {
        waited: Duration::from_secs(60),
    };
    assert!(timeout.to_string().starts_with("Analysis timed out after 60s."));

    let failure = DetectionError::ClassificationFailure("no face".to_string());
    assert_eq!(failure.to_string(), "Analysis failed: no face");

    assert!(matches!(
        Error::from(DetectionError::UploadRead("eof".to_string())),
        Error::InvalidInput(_)
    ));
    assert!(matches!(
        Error::from(DetectionError::ArtifactIo("disk full".to_string())),
        Error::OperationFailed { .. }
    ));
}

#[test]
fn test_normalize_classifier_json() {
    // Typical classifier output, with a face region the pipeline ignores.
    let raw = r#"[{
        "dominant_emotion": "surprise",
        "emotion": {"angry": 0.1, "surprise": 87.9, "neutral": 12.0},
        "region": {"x": 10, "y": 12, "w": 80, "h": 80}
    }]"#;
    let output: ClassifierOutput = serde_json::from_str(raw).unwrap();
    let result: DetectionResult = normalize(output).unwrap();

    assert_eq!(result.dominant_emotion, "surprise");
    assert!((result.confidence - 87.9).abs() < f64::EPSILON);
    assert_eq!(
        serde_json::to_string(&result.emotions).unwrap(),
        r#"{"angry":0.1,"surprise":87.9,"neutral":12.0}"#
    );
}

#[test]
fn test_config_file_round_trip_into_detector() {
    let config = MoodscanConfig::parse_toml(
        r#"
        [server]
        port = 8123

        [detection]
        timeout_secs = 5
        workers = 0

        [classifier]
        command = "/usr/local/bin/classify-emotion"
        args = ["--json"]
        "#,
    )
    .unwrap();

    assert_eq!(config.server.port, 8123);
    assert_eq!(config.detection.workers, 1);

    let detector = EmotionDetector::from_config(&config).unwrap();
    assert_eq!(detector.timeout(), Duration::from_secs(5));
    assert_eq!(detector.executor().workers(), 1);
}

#[tokio::test]
async fn test_unconfigured_classifier_fails_in_band() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = MoodscanConfig::new().with_artifact_dir(dir.path());
    let detector = EmotionDetector::from_config(&config).unwrap();

    let err = detector.detect(b"jpeg".to_vec()).await.unwrap_err();
    assert!(err.to_string().contains("classifier not configured"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
