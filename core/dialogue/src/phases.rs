use emodiary_schemas::{DialogueTurn, Phase, Role};
use serde::Deserialize;
use tracing::warn;

use crate::llm::{generate_analysis, LanguageModel};
use crate::parse::{decode_or_text, Decoded};

/// Explore stops probing after this many user turns even when details are
/// still missing, so a terse user is not interrogated forever.
pub const EXPLORE_TURN_CEILING: usize = 6;

/// What the explore phase has established so far about the diary event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExploreSummary {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub people: Option<String>,
    #[serde(default)]
    pub time_of_day: Option<String>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl ExploreSummary {
    pub fn is_complete(&self) -> bool {
        self.event.is_some()
            && self.location.is_some()
            && self.people.is_some()
            && self.time_of_day.is_some()
    }

    /// The next detail worth asking about, most important first.
    pub fn most_important_missing(&self) -> Option<&'static str> {
        if self.event.is_none() {
            Some("what happened")
        } else if self.people.is_none() {
            Some("who was involved")
        } else if self.location.is_none() {
            Some("where it happened")
        } else if self.time_of_day.is_none() {
            Some("what time of day it happened")
        } else {
            None
        }
    }
}

// The model sometimes nests the fields under a "summary" key; accept both.
#[derive(Debug, Deserialize)]
struct WrappedSummary {
    summary: ExploreSummary,
}

/// Soft failures surface as `Malformed`: the turn proceeds but the caller
/// flags the degraded result. Hard failures (transport, empty output) bubble
/// up as `Err` from the check functions themselves.
#[derive(Debug, Clone)]
pub enum Verdict<T> {
    Ok(T),
    Malformed,
}

/// Ask the model whether the explore phase has gathered enough detail about
/// the diary event, and what is still missing.
pub async fn check_explore_criteria(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
) -> anyhow::Result<Verdict<ExploreSummary>> {
    let instruction = r#"Given the diary and dialog, determine whether enough detail about the described event has been gathered.
Use JSON format with the following properties:
- event: one sentence describing the key event, or null if it is still unclear.
- location: where the event happened, or null if unknown.
- people: who was involved or caused the situation, or null if unknown.
- time_of_day: when the event happened, or null if unknown.
- skip: true only if the user declined to share more or asked to move on.
- rationale: describe your rationale on how properties were derived.
{
    "event": string | null,
    "location": string | null,
    "people": string | null,
    "time_of_day": string | null,
    "skip": boolean,
    "rationale": string
}"#;

    let raw = generate_analysis(llm, diary, dialogue, instruction).await?;

    if let Decoded::Parsed(summary) = decode_or_text::<ExploreSummary>(&raw) {
        return Ok(Verdict::Ok(summary));
    }
    if let Decoded::Parsed(wrapped) = decode_or_text::<WrappedSummary>(&raw) {
        return Ok(Verdict::Ok(wrapped.summary));
    }
    warn!("Explore criteria check returned malformed JSON");
    Ok(Verdict::Malformed)
}

#[derive(Debug, Clone, Default)]
pub struct Satisfaction {
    pub satisfied: bool,
    pub rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BinaryReply {
    response: String,
    #[serde(default)]
    rationale: Option<String>,
}

/// Ask the model whether the user accepted the emotion assessment in the
/// latest feedback exchange.
pub async fn check_satisfaction(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
) -> anyhow::Result<Verdict<Satisfaction>> {
    let instruction = r#"Given the diary and dialog, determine whether the user agreed with the emotions suggested to them.
Answer "true" only when the user clearly accepted the assessment; answer "false" when they disagreed, corrected it, or asked for changes.
Use JSON format with the following properties:
- response: "true" or "false".
- rationale: one sentence explaining the user's reason or objection.
{
    "response": string,
    "rationale": string
}"#;

    let raw = generate_analysis(llm, diary, dialogue, instruction).await?;

    match decode_or_text::<BinaryReply>(&raw) {
        Decoded::Parsed(reply) => Ok(Verdict::Ok(Satisfaction {
            satisfied: reply.response.trim().eq_ignore_ascii_case("true"),
            rationale: reply.rationale.filter(|r| !r.trim().is_empty()),
        })),
        Decoded::Raw(_) => {
            warn!("Satisfaction check returned malformed JSON");
            Ok(Verdict::Malformed)
        }
    }
}

/// The decision extracted from a turn's criteria checks, independent of how
/// it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriteriaSignal {
    /// Explore has not gathered enough yet and the turn ceiling is not hit.
    KeepExploring,
    /// Explore is done (complete, skipped, or ceiling reached).
    ExploreDone,
    /// The user accepted the emotion assessment.
    Satisfied,
    /// The user pushed back on the assessment.
    Unsatisfied,
    /// The check could not be interpreted; hold position.
    Inconclusive,
}

/// Total transition function over the phase graph. Every (phase, signal)
/// pair maps to a phase; holding position is always a legal outcome.
pub fn transition(current: Phase, signal: CriteriaSignal) -> Phase {
    match (current, signal) {
        (Phase::Explore, CriteriaSignal::ExploreDone) => Phase::Detect,
        (Phase::Explore, _) => Phase::Explore,
        // Detect always hands off: emotions are presented, feedback comes next.
        (Phase::Detect, _) => Phase::Reflect,
        (Phase::Reflect, CriteriaSignal::Satisfied) => Phase::Goodbye,
        (Phase::Reflect, CriteriaSignal::Unsatisfied) => Phase::Revise,
        (Phase::Reflect, _) => Phase::Reflect,
        (Phase::Revise, CriteriaSignal::Satisfied) => Phase::Goodbye,
        (Phase::Revise, CriteriaSignal::Unsatisfied) => Phase::Revise,
        (Phase::Revise, _) => Phase::Revise,
        (Phase::Goodbye, _) => Phase::Goodbye,
    }
}

/// Number of user-authored turns in the dialogue.
pub fn user_turn_count(dialogue: &[DialogueTurn]) -> usize {
    dialogue.iter().filter(|t| t.role == Role::User).count()
}
