use emodiary_schemas::{DiaryContext, DiaryEntry, DiaryId, EmotionTaxonomy, TimeOfDay};
use serde::Serialize;
use tracing::debug;

use crate::similarity::{context_similarity, emotion_similarity, min_max_scale, ContextWeights};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub weights: ContextWeights,
    /// Hard cutoff: context candidates below this similarity are discarded
    /// entirely, not soft-ranked.
    pub inclusion_threshold: f32,
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            weights: ContextWeights::default(),
            inclusion_threshold: 0.5,
            top_k: 3,
        }
    }
}

/// A past entry surfaced for prompting. Serialized directly into the
/// reflection instruction, so it carries only user-visible fields.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedEntry {
    pub content: String,
    pub emotions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub people: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
}

impl RetrievedEntry {
    fn with_context(entry: &DiaryEntry) -> Self {
        Self {
            content: entry.content.clone(),
            emotions: entry.emotions.clone(),
            activity: entry.context.activity.clone(),
            location: entry.context.location.clone(),
            people: entry.context.people.clone(),
            time_of_day: entry.context.time_of_day,
        }
    }

    fn emotions_only(entry: &DiaryEntry) -> Self {
        Self {
            content: entry.content.clone(),
            emotions: entry.emotions.clone(),
            activity: None,
            location: None,
            people: None,
            time_of_day: None,
        }
    }
}

struct Candidate<'a> {
    entry: &'a DiaryEntry,
    similarity: f32,
    retention: f32,
}

/// Rank a user's past entries against the current context. Candidates below
/// the inclusion threshold are dropped; survivors are ordered by
/// `context_retention + similarity` descending, top-k returned.
pub fn retrieve_by_context(
    entries: &[DiaryEntry],
    exclude: Option<&DiaryId>,
    query: &DiaryContext,
    config: &RetrievalConfig,
) -> Vec<RetrievedEntry> {
    let candidates: Vec<Candidate> = entries
        .iter()
        .filter(|entry| exclude != Some(&entry.id))
        .filter_map(|entry| {
            let similarity = context_similarity(&config.weights, query, &entry.context);
            if similarity >= config.inclusion_threshold {
                Some(Candidate {
                    entry,
                    similarity,
                    retention: entry.context_retention,
                })
            } else {
                None
            }
        })
        .collect();

    debug!(
        "Context retrieval: {} of {} entries qualified",
        candidates.len(),
        entries.len()
    );

    rank(candidates, config.top_k)
        .into_iter()
        .map(RetrievedEntry::with_context)
        .collect()
}

/// Rank a user's past entries against the current emotion set. Positive raw
/// similarities are min-max normalized across the whole candidate batch
/// before being combined with `emotion_retention`; the rescaling is
/// intentionally batch-relative.
pub fn retrieve_by_emotion(
    entries: &[DiaryEntry],
    exclude: Option<&DiaryId>,
    emotions: &[String],
    taxonomy: &EmotionTaxonomy,
    config: &RetrievalConfig,
) -> Vec<RetrievedEntry> {
    if emotions.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<Candidate> = entries
        .iter()
        .filter(|entry| exclude != Some(&entry.id))
        .filter_map(|entry| {
            let similarity = emotion_similarity(taxonomy, emotions, &entry.emotions);
            if similarity > 0.0 {
                Some(Candidate {
                    entry,
                    similarity,
                    retention: entry.emotion_retention,
                })
            } else {
                None
            }
        })
        .collect();

    let raw: Vec<f32> = candidates.iter().map(|c| c.similarity).collect();
    for (candidate, scaled) in candidates.iter_mut().zip(min_max_scale(&raw)) {
        candidate.similarity = scaled;
    }

    debug!(
        "Emotion retrieval: {} of {} entries qualified",
        candidates.len(),
        entries.len()
    );

    rank(candidates, config.top_k)
        .into_iter()
        .map(RetrievedEntry::emotions_only)
        .collect()
}

fn rank(mut candidates: Vec<Candidate>, top_k: usize) -> Vec<&DiaryEntry> {
    candidates.sort_by(|a, b| {
        (b.retention + b.similarity)
            .partial_cmp(&(a.retention + a.similarity))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_k);
    candidates.into_iter().map(|c| c.entry).collect()
}
