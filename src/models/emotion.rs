//! Emotion distributions and classifier output shapes.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Per-emotion confidence scores, in the order the classifier produced them.
///
/// Scores are relative confidence percentages and need not sum to 100.
/// Serialized as a JSON object (`{"happy": 91.2, "sad": 3.1, ...}`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmotionDistribution {
    scores: Vec<(String, f64)>,
}

impl EmotionDistribution {
    /// Creates an empty distribution.
    #[must_use]
    pub const fn new() -> Self {
        Self { scores: Vec::new() }
    }

    /// Sets the score for a label, replacing any previous value in place.
    #[must_use]
    pub fn with_score(mut self, label: impl Into<String>, score: f64) -> Self {
        self.insert(label, score);
        self
    }

    /// Sets the score for a label, replacing any previous value in place.
    pub fn insert(&mut self, label: impl Into<String>, score: f64) {
        let label = label.into();
        if let Some(slot) = self.scores.iter_mut().find(|(existing, _)| *existing == label) {
            slot.1 = score;
        } else {
            self.scores.push((label, score));
        }
    }

    /// Returns the score for a label.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, score)| *score)
    }

    /// Returns true if the label has a score.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    /// Iterates `(label, score)` pairs in classifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.scores
            .iter()
            .map(|(label, score)| (label.as_str(), *score))
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Returns true if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for EmotionDistribution {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |dist, (label, score)| dist.with_score(label, score))
    }
}

impl Serialize for EmotionDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.scores.len()))?;
        for (label, score) in &self.scores {
            map.serialize_entry(label, score)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EmotionDistribution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DistributionVisitor;

        impl<'de> Visitor<'de> for DistributionVisitor {
            type Value = EmotionDistribution;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of emotion label to score")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut dist = EmotionDistribution::new();
                while let Some((label, score)) = access.next_entry::<String, f64>()? {
                    dist.insert(label, score);
                }
                Ok(dist)
            }
        }

        deserializer.deserialize_map(DistributionVisitor)
    }
}

/// One face as reported by the classifier.
///
/// Extra fields the classifier emits (face region, detector confidence) are
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    /// Label the classifier picked as dominant.
    pub dominant_emotion: String,
    /// Full distribution for this face.
    pub emotion: EmotionDistribution,
}

/// Raw classifier output: one analysis or one per detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassifierOutput {
    /// One analysis per detected face.
    Faces(Vec<FaceAnalysis>),
    /// A single analysis.
    Single(FaceAnalysis),
}

impl ClassifierOutput {
    /// Returns the analysis the response is built from: the first face for a
    /// sequence, the value itself otherwise.
    #[must_use]
    pub fn into_primary(self) -> Option<FaceAnalysis> {
        match self {
            Self::Faces(faces) => faces.into_iter().next(),
            Self::Single(face) => Some(face),
        }
    }
}

/// Successful `/detect_emotion` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Dominant label; always a key of `emotions`.
    pub dominant_emotion: String,
    /// Score of the dominant label.
    pub confidence: f64,
    /// Full distribution.
    pub emotions: EmotionDistribution,
}
