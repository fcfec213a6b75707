//! Data models for moodscan.
//!
//! Wire types shared by the detection pipeline, the session register, and the
//! wellness responder.

mod chat;
mod emotion;
mod session;

pub use chat::{ChatChoice, ChatDelta, ChatMessage, ChatReply, ChatRequest, ReportContext};
pub use emotion::{ClassifierOutput, DetectionResult, EmotionDistribution, FaceAnalysis};
pub use session::SessionRecord;
