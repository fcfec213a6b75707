//! Canned wellness guidance for the chat endpoint.
//!
//! Replies come from an ordered keyword table: the first rule with a keyword
//! contained in the lower-cased message wins, and a fallback answers
//! everything else. Responses are deterministic and stateless.

use crate::models::{ChatReply, ChatRequest, ReportContext};
use crate::{Error, Result};
use serde_json::Value;
use std::fmt::Write as _;

/// Returned when the conversation has no user turn.
pub const NO_USER_MESSAGE: &str = "No user message provided";

/// Stress level used when no report accompanies the request.
const UNKNOWN_LEVEL: &str = "unknown";

/// Levels that get the intensive stress plan.
const ELEVATED_LEVELS: [&str; 2] = ["High", "Critical"];

/// Inputs every rule can draw on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// Rendered report summary; empty without a report.
    pub summary: String,
    /// Stress level from the report, or `unknown`.
    pub stress_level: String,
}

impl Assessment {
    /// Builds the assessment from an optional report.
    ///
    /// An absent or empty report yields an empty summary and an `unknown`
    /// level. Component scores are listed only when present and non-zero.
    #[must_use]
    pub fn from_report(report: Option<&ReportContext>) -> Self {
        let Some(report) = report.filter(|r| !r.is_empty()) else {
            return Self {
                summary: String::new(),
                stress_level: UNKNOWN_LEVEL.to_string(),
            };
        };

        let stress_level = report
            .get("stressLevel")
            // null reads as unknown, not as the string "null"
            .filter(|v| !v.is_null())
            .map_or_else(|| UNKNOWN_LEVEL.to_string(), display_value);
        let final_score = report
            .get("finalScore")
            // null reads as 0, same as a missing score
            .filter(|v| !v.is_null())
            .map_or_else(|| "0".to_string(), display_value);

        let mut summary = format!(
            "\nUser's Stress Assessment:\n- Overall Score: {final_score}/3.00\n- Stress Level: {stress_level}\n"
        );
        for (key, label) in [
            ("emotionScore", "Emotion"),
            ("cognitiveScore", "Cognitive"),
            ("healthScore", "Health"),
        ] {
            if let Some(value) = report.get(key).filter(|v| is_truthy(v)) {
                let _ = writeln!(summary, "- {label} Score: {}/3.00", display_value(value));
            }
        }

        Self {
            summary,
            stress_level,
        }
    }
}

/// One keyword rule.
struct Rule {
    name: &'static str,
    keywords: &'static [&'static str],
    respond: fn(&Assessment) -> String,
}

const RULES: &[Rule] = &[
    Rule {
        name: "stress",
        keywords: &["stress", "anxious", "worried", "pressure"],
        respond: stress_reply,
    },
    Rule {
        name: "sleep",
        keywords: &["sleep", "tired", "insomnia", "rest"],
        respond: sleep_reply,
    },
    Rule {
        name: "nutrition",
        keywords: &["diet", "nutrition", "food", "eating"],
        respond: nutrition_reply,
    },
    Rule {
        name: "exercise",
        keywords: &["exercise", "workout", "fitness", "physical"],
        respond: exercise_reply,
    },
    Rule {
        name: "advice",
        keywords: &["help", "advice", "recommend", "suggest"],
        respond: advice_reply,
    },
    Rule {
        name: "thanks",
        keywords: &["thank", "thanks"],
        respond: thanks_reply,
    },
];

/// Keyword-driven wellness responder.
#[derive(Debug, Clone, Copy, Default)]
pub struct WellnessResponder;

impl WellnessResponder {
    /// Creates a responder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Answers the most recent user message in `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] with [`NO_USER_MESSAGE`] when no
    /// message has the `user` role.
    pub fn respond(&self, request: &ChatRequest) -> Result<ChatReply> {
        let message = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .ok_or_else(|| Error::InvalidInput(NO_USER_MESSAGE.to_string()))?;

        let assessment = Assessment::from_report(request.report_context.as_ref());
        Ok(ChatReply::from_text(self.reply_to(&message.content, &assessment)))
    }

    /// Picks the reply for a single message.
    #[must_use]
    pub fn reply_to(&self, message: &str, assessment: &Assessment) -> String {
        let lowered = message.to_lowercase();
        match RULES
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| lowered.contains(*k)))
        {
            Some(rule) => {
                tracing::debug!(rule = rule.name, "Wellness rule matched");
                (rule.respond)(assessment)
            },
            None => {
                tracing::debug!("No wellness rule matched, using fallback");
                fallback_reply(assessment)
            },
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn sleep_reply(_: &Assessment) -> String {
    SLEEP_REPLY.to_string()
}

fn nutrition_reply(_: &Assessment) -> String {
    NUTRITION_REPLY.to_string()
}

fn exercise_reply(_: &Assessment) -> String {
    EXERCISE_REPLY.to_string()
}

fn thanks_reply(_: &Assessment) -> String {
    THANKS_REPLY.to_string()
}

fn stress_reply(assessment: &Assessment) -> String {
    if ELEVATED_LEVELS.contains(&assessment.stress_level.as_str()) {
        format!(
            "I understand you're experiencing significant stress. Given your assessment shows a {} stress level, I recommend:\n\n\
             1. **Deep Breathing Exercises**: Practice 4-7-8 breathing (inhale 4s, hold 7s, exhale 8s) for 5 minutes daily.\n\n\
             2. **Physical Activity**: Engage in 30 minutes of moderate exercise like walking, yoga, or swimming to release endorphins.\n\n\
             3. **Sleep Hygiene**: Aim for 7-9 hours of quality sleep. Establish a consistent bedtime routine.\n\n\
             4. **Professional Support**: Consider speaking with a therapist or counselor for ongoing support.\n\n\
             5. **Mindfulness**: Try meditation apps or practice mindfulness for 10-15 minutes daily.\n\n\
             Would you like me to elaborate on any of these techniques?",
            assessment.stress_level.to_lowercase()
        )
    } else {
        MILD_STRESS_REPLY.to_string()
    }
}

fn advice_reply(assessment: &Assessment) -> String {
    format!(
        "Based on your stress assessment, here are personalized recommendations:\n\n{}\n\n\
         **Priority Actions**:\n\
         1. Identify your main stress triggers\n\
         2. Practice daily stress-reduction techniques\n\
         3. Maintain healthy routines (sleep, diet, exercise)\n\
         4. Seek social support\n\
         5. Consider professional guidance if needed\n\n\
         What specific area would you like to explore further?",
        assessment.summary
    )
}

fn fallback_reply(assessment: &Assessment) -> String {
    format!(
        "I'm here to help with your wellness journey based on your stress assessment.{}\n\n\
         I can help you with:\n\
         - Stress management techniques\n\
         - Sleep improvement strategies\n\
         - Nutrition and diet advice\n\
         - Exercise recommendations\n\
         - Coping strategies\n\n\
         What would you like to know more about?",
        assessment.summary
    )
}

const MILD_STRESS_REPLY: &str = "It's great that you're being proactive about managing stress! Here are some effective strategies:\n\n\
**Immediate Relief**:\n\
- Take 5 deep breaths\n\
- Step away for a 10-minute walk\n\
- Listen to calming music\n\n\
**Long-term Strategies**:\n\
- Regular exercise routine\n\
- Balanced nutrition\n\
- Social connections\n\
- Hobbies and interests\n\n\
What specific area would you like to focus on?";

const SLEEP_REPLY: &str = "Sleep is crucial for managing stress. Here are tips for better sleep:\n\n\
**Sleep Hygiene**:\n\
- Maintain a consistent sleep schedule\n\
- Create a dark, cool, quiet bedroom\n\
- Avoid screens 1 hour before bed\n\
- Limit caffeine after 2 PM\n\
- Try relaxation techniques before sleep\n\n\
**If you're having trouble sleeping**:\n\
- Progressive muscle relaxation\n\
- Guided sleep meditation\n\
- Write down worries before bed\n\
- Ensure your mattress and pillow are comfortable\n\n\
How's your current sleep routine?";

const NUTRITION_REPLY: &str = "Nutrition plays a key role in stress management:\n\n\
**Stress-Reducing Foods**:\n\
- Omega-3 rich foods (salmon, walnuts)\n\
- Complex carbs (whole grains)\n\
- Magnesium sources (spinach, almonds)\n\
- Vitamin C (citrus fruits)\n\n\
**Avoid**:\n\
- Excessive caffeine\n\
- High-sugar foods\n\
- Processed foods\n\
- Alcohol (can disrupt sleep)\n\n\
**Tips**:\n\
- Eat regular, balanced meals\n\
- Stay hydrated\n\
- Consider meal planning to reduce decision fatigue\n\n\
Would you like specific meal suggestions?";

const EXERCISE_REPLY: &str = "Exercise is one of the most effective stress relievers:\n\n\
**Benefits**:\n\
- Releases endorphins (natural mood boosters)\n\
- Improves sleep quality\n\
- Increases energy levels\n\
- Enhances cognitive function\n\n\
**Recommended**:\n\
- 150 minutes moderate exercise per week\n\
- Mix of cardio, strength, and flexibility\n\
- Activities you enjoy are more sustainable\n\n\
**Low-impact options**:\n\
- Walking, yoga, swimming, cycling\n\
- Start with 10-15 minutes and build up\n\n\
What type of exercise do you enjoy?";

const THANKS_REPLY: &str = "You're very welcome! Remember, managing stress is a journey, not a destination. \
Don't hesitate to reach out if you have more questions or need additional support. Take care of yourself! \u{1F60A}";
