//! Classifier backed by an external program.
//!
//! The program receives the image path as its last argument and the analyze
//! options as environment variables:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `MOODSCAN_ACTIONS` | Comma-separated actions, e.g. `emotion` |
//! | `MOODSCAN_ENFORCE_DETECTION` | `true` or `false` |
//! | `MOODSCAN_DETECTOR_BACKEND` | e.g. `opencv` |
//!
//! It must print a face analysis (or an array of them) as JSON on stdout and
//! exit 0. On failure, the trimmed stderr becomes the error message.

use super::{AnalyzeOptions, EmotionClassifier};
use crate::config::ClassifierConfig;
use crate::models::ClassifierOutput;
use crate::{Error, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Longest stderr excerpt kept in an error message.
const MAX_STDERR_CHARS: usize = 2_000;

/// Runs an external program per classification.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: String,
    args: Vec<String>,
}

impl CommandClassifier {
    /// Creates a classifier running `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Builds a classifier from configuration, if a command is set.
    #[must_use]
    pub fn from_config(config: &ClassifierConfig) -> Option<Self> {
        config
            .command
            .as_ref()
            .map(|program| Self::new(program.clone()).with_args(config.args.clone()))
    }

    /// Sets the arguments placed before the image path.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Adds one argument placed before the image path.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl EmotionClassifier for CommandClassifier {
    fn name(&self) -> &'static str {
        "command"
    }

    fn analyze(&self, image: &Path, options: &AnalyzeOptions) -> Result<ClassifierOutput> {
        let started = Instant::now();
        tracing::info!(
            program = %self.program,
            image = %image.display(),
            backend = %options.detector_backend,
            "Starting classifier"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .env("MOODSCAN_ACTIONS", options.actions.join(","))
            .env(
                "MOODSCAN_ENFORCE_DETECTION",
                options.enforce_detection.to_string(),
            )
            .env("MOODSCAN_DETECTOR_BACKEND", &options.detector_backend)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::OperationFailed {
                operation: "classifier_spawn".to_string(),
                cause: format!("{}: {e}", self.program),
            })?;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = truncate(stderr.trim(), MAX_STDERR_CHARS);
            tracing::error!(status = %output.status, elapsed_ms, stderr = %stderr, "Classifier failed");
            let cause = if stderr.is_empty() {
                format!("classifier exited with {}", output.status)
            } else {
                stderr
            };
            return Err(Error::OperationFailed {
                operation: "classify".to_string(),
                cause,
            });
        }

        let parsed: ClassifierOutput =
            serde_json::from_slice(&output.stdout).map_err(|e| Error::OperationFailed {
                operation: "classifier_output".to_string(),
                cause: format!("output is not a face analysis: {e}"),
            })?;

        tracing::info!(elapsed_ms, "Classifier completed");
        Ok(parsed)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandClassifier {
        CommandClassifier::new("sh")
            .with_arg("-c")
            .with_arg(script)
            .with_arg("classifier")
    }

    #[test]
    fn test_parses_single_analysis() {
        let classifier = shell(
            r#"printf '{"dominant_emotion":"happy","emotion":{"happy":88.5,"sad":11.5}}'"#,
        );
        let output = classifier
            .analyze(Path::new("/tmp/face.jpg"), &AnalyzeOptions::default())
            .unwrap();

        let face = output.into_primary().unwrap();
        assert_eq!(face.dominant_emotion, "happy");
        assert_eq!(face.emotion.get("happy"), Some(88.5));
    }

    #[test]
    fn test_passes_path_and_options() {
        let classifier = shell(
            r#"printf '{"dominant_emotion":"%s","emotion":{"%s":1.0}}' "$MOODSCAN_DETECTOR_BACKEND" "$MOODSCAN_DETECTOR_BACKEND"; [ "$1" = "/tmp/face.jpg" ] && [ "$MOODSCAN_ENFORCE_DETECTION" = "false" ] && [ "$MOODSCAN_ACTIONS" = "emotion" ]"#,
        );
        let output = classifier
            .analyze(Path::new("/tmp/face.jpg"), &AnalyzeOptions::default())
            .unwrap();
        assert_eq!(output.into_primary().unwrap().dominant_emotion, "opencv");
    }

    #[test]
    fn test_nonzero_exit_reports_stderr() {
        let classifier = shell("echo 'Face could not be detected' >&2; exit 3");
        let err = classifier
            .analyze(Path::new("/tmp/face.jpg"), &AnalyzeOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("Face could not be detected"));
    }

    #[test]
    fn test_nonzero_exit_without_stderr() {
        let classifier = shell("exit 4");
        let err = classifier
            .analyze(Path::new("/tmp/face.jpg"), &AnalyzeOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("classifier exited with"));
    }

    #[test]
    fn test_garbage_output_is_error() {
        let classifier = shell("echo 'not json'");
        let err = classifier
            .analyze(Path::new("/tmp/face.jpg"), &AnalyzeOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("not a face analysis"));
    }

    #[test]
    fn test_missing_program_is_error() {
        let classifier = CommandClassifier::new("/nonexistent/moodscan-classifier");
        let err = classifier
            .analyze(Path::new("/tmp/face.jpg"), &AnalyzeOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("classifier_spawn"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
