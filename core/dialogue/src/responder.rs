use emodiary_schemas::DialogueTurn;
use emodiary_retrieval::RetrievedEntry;
use serde::Deserialize;
use tracing::warn;

use crate::llm::{generate_analysis, generate_response, LanguageModel};
use crate::parse::{decode_or_text, strip_outer_quotes, Decoded};
use crate::phases::Verdict;

/// Emotion labels carried per entry, most intense first.
pub const MAX_EMOTION_LABELS: usize = 3;

const PERSONA: &str = "You are a warm, empathetic diary companion. Speak in a \
caring, conversational tone, at most three sentences, and never lecture.";

/// Ask the user about the most important missing event detail.
pub async fn ask_missing_info(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
    missing: &str,
) -> anyhow::Result<String> {
    let instruction = format!(
        "{PERSONA}\nThe diary leaves one detail unclear: {missing}. Ask one \
gentle, specific question about it. Do not ask about anything else."
    );
    let reply = generate_response(llm, diary, dialogue, &instruction).await?;
    Ok(strip_outer_quotes(&reply))
}

#[derive(Debug, Clone, Default)]
pub struct EmotionAssessment {
    /// Validated labels, most intense first, at most [`MAX_EMOTION_LABELS`].
    pub emotions: Vec<String>,
    pub rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(default)]
    emotions: Vec<String>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Infer the user's emotions from the diary and dialogue, optionally primed
/// with similar past entries. Labels outside `allowed` are dropped rather
/// than invented; the survivor list is capped at three.
pub async fn infer_emotions(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
    similar: &[RetrievedEntry],
    allowed: &[String],
) -> anyhow::Result<Verdict<EmotionAssessment>> {
    let mut instruction = format!(
        r#"Given the diary and dialog, infer which emotions the user felt.
Only use emotion labels from this list: {}.
Order emotions from most intense to least intense, and return at most three.
Use JSON format with the following properties:
- emotions: array of emotion labels.
- rationale: describe your rationale on how the emotions were derived.
{{
    "emotions": string[],
    "rationale": string
}}"#,
        allowed.join(", ")
    );

    if !similar.is_empty() {
        let examples = serde_json::to_string(similar).unwrap_or_else(|_| "[]".to_string());
        instruction.push_str(&format!(
            "\nThe user felt these emotions in similar past situations: {examples}"
        ));
    }

    let raw = generate_analysis(llm, diary, dialogue, &instruction).await?;

    match decode_or_text::<RawAssessment>(&raw) {
        Decoded::Parsed(parsed) => Ok(Verdict::Ok(EmotionAssessment {
            emotions: validate_labels(parsed.emotions, allowed),
            rationale: parsed.rationale.filter(|r| !r.trim().is_empty()),
        })),
        Decoded::Raw(_) => {
            warn!("Emotion inference returned malformed JSON");
            Ok(Verdict::Malformed)
        }
    }
}

/// Re-run emotion inference after the user pushed back, excluding the labels
/// they rejected.
pub async fn revise_emotions(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
    similar: &[RetrievedEntry],
    allowed: &[String],
    rejected: &[String],
) -> anyhow::Result<Verdict<EmotionAssessment>> {
    let remaining: Vec<String> = allowed
        .iter()
        .filter(|label| !rejected.iter().any(|r| r.eq_ignore_ascii_case(label)))
        .cloned()
        .collect();
    infer_emotions(llm, diary, dialogue, similar, &remaining).await
}

/// Present an emotion assessment to the user and invite their reaction.
pub async fn present_emotions(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
    emotions: &[String],
    rationale: Option<&str>,
) -> anyhow::Result<String> {
    let mut instruction = format!(
        "{PERSONA}\nTell the user you think they felt: {}. Briefly say why, \
then ask whether that matches how they actually felt.",
        emotions.join(", ")
    );
    if let Some(rationale) = rationale {
        instruction.push_str(&format!("\nYour reasoning: {rationale}"));
    }
    let reply = generate_response(llm, diary, dialogue, &instruction).await?;
    Ok(strip_outer_quotes(&reply))
}

/// Reflect the user's current experience against similar past entries. When
/// retrieval found nothing, no reflection is fabricated and `None` comes
/// back so the caller can fall through to plain feedback solicitation.
pub async fn generate_reflection(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
    context_entries: &[RetrievedEntry],
    emotion_entries: &[RetrievedEntry],
) -> anyhow::Result<Option<String>> {
    if context_entries.is_empty() && emotion_entries.is_empty() {
        return Ok(None);
    }

    let context_json =
        serde_json::to_string(context_entries).unwrap_or_else(|_| "[]".to_string());
    let emotion_json =
        serde_json::to_string(emotion_entries).unwrap_or_else(|_| "[]".to_string());
    let instruction = format!(
        "{PERSONA}\nConnect today's experience to the user's own past. \
Entries from similar situations: {context_json}. Entries with similar \
feelings: {emotion_json}. Mention at most one past experience, only if it \
genuinely relates, and never invent memories that are not listed."
    );
    let reply = generate_response(llm, diary, dialogue, &instruction).await?;
    Ok(Some(strip_outer_quotes(&reply)))
}

/// Invite the user to correct or confirm the emotion assessment.
pub async fn encourage_feedback(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
) -> anyhow::Result<String> {
    let instruction = format!(
        "{PERSONA}\nGently invite the user to say whether the emotions you \
suggested fit, and to correct you if they do not."
    );
    let reply = generate_response(llm, diary, dialogue, &instruction).await?;
    Ok(strip_outer_quotes(&reply))
}

/// Close the conversation warmly.
pub async fn goodbye_message(
    llm: &dyn LanguageModel,
    diary: &str,
    dialogue: &[DialogueTurn],
) -> anyhow::Result<String> {
    let instruction = format!(
        "{PERSONA}\nThe conversation is ending. Thank the user for sharing, \
acknowledge their feelings in one sentence, and say goodbye."
    );
    let reply = generate_response(llm, diary, dialogue, &instruction).await?;
    Ok(strip_outer_quotes(&reply))
}

/// Drop labels outside the allowed list, dedup case-insensitively, keep
/// order, cap at [`MAX_EMOTION_LABELS`].
pub fn validate_labels(candidates: Vec<String>, allowed: &[String]) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for candidate in candidates {
        let candidate = candidate.trim().to_lowercase();
        if candidate.is_empty() {
            continue;
        }
        let valid = allowed.iter().any(|a| a.eq_ignore_ascii_case(&candidate));
        let duplicate = kept.iter().any(|k| k.eq_ignore_ascii_case(&candidate));
        if valid && !duplicate {
            kept.push(candidate);
        }
        if kept.len() == MAX_EMOTION_LABELS {
            break;
        }
    }
    kept
}
