use chrono::{DateTime, Utc};
use emodiary_schemas::{DiaryEntry, DiaryId, EmotionTaxonomy};
use tracing::debug;

use crate::similarity::{context_similarity, emotion_similarity, min_max_scale, ContextWeights};

/// Decayed salience in [0,1]: `exp(-t / (f + s))` where `t` is age in days
/// and `f + s` is the memory strength (repetition count plus similarity
/// mass). Zero strength is defined as zero retention, not a division.
pub fn retention_score(age_days: f32, frequency: f32, similarity_mass: f32) -> f32 {
    let strength = frequency + similarity_mass;
    if strength <= 0.0 {
        return 0.0;
    }
    (-age_days.max(0.0) / strength).exp().clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionUpdate {
    pub diary_id: DiaryId,
    pub context_retention: f32,
    pub emotion_retention: f32,
}

/// Recompute retention for every entry of one user in a single pass.
///
/// For each entry and each axis (context, emotion), the strength is derived
/// from its positively-similar siblings: `f` counts them, `s` sums their
/// similarity. Raw scores are then min-max normalized per axis across the
/// whole batch so one very recent, very repeated entry does not flatten the
/// rest. The pass is pure; callers persist the updates.
pub fn compute_retention(
    entries: &[DiaryEntry],
    taxonomy: &EmotionTaxonomy,
    weights: &ContextWeights,
    now: DateTime<Utc>,
) -> Vec<RetentionUpdate> {
    let ages: Vec<f32> = entries.iter().map(|e| age_in_days(e, now)).collect();

    let mut context_raw = Vec::with_capacity(entries.len());
    let mut emotion_raw = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let mut ctx_frequency = 0.0;
        let mut ctx_mass = 0.0;
        let mut emo_frequency = 0.0;
        let mut emo_mass = 0.0;

        for (j, other) in entries.iter().enumerate() {
            if i == j {
                continue;
            }
            let ctx_sim = context_similarity(weights, &entry.context, &other.context);
            if ctx_sim > 0.0 {
                ctx_frequency += 1.0;
                ctx_mass += ctx_sim;
            }
            let emo_sim = emotion_similarity(taxonomy, &entry.emotions, &other.emotions);
            if emo_sim > 0.0 {
                emo_frequency += 1.0;
                emo_mass += emo_sim;
            }
        }

        context_raw.push(retention_score(ages[i], ctx_frequency, ctx_mass));
        emotion_raw.push(retention_score(ages[i], emo_frequency, emo_mass));
    }

    let context_scaled = min_max_scale(&context_raw);
    let emotion_scaled = min_max_scale(&emotion_raw);

    debug!(
        "Computed retention for {} entries ({} taxonomy)",
        entries.len(),
        taxonomy.name()
    );

    entries
        .iter()
        .zip(context_scaled.iter().zip(emotion_scaled.iter()))
        .map(|(entry, (ctx, emo))| RetentionUpdate {
            diary_id: entry.id.clone(),
            context_retention: ctx.clamp(0.0, 1.0),
            emotion_retention: emo.clamp(0.0, 1.0),
        })
        .collect()
}

fn age_in_days(entry: &DiaryEntry, now: DateTime<Utc>) -> f32 {
    DateTime::parse_from_rfc3339(&entry.timestamp)
        .map(|ts| {
            let age_seconds = (now.timestamp() - ts.timestamp()) as f32;
            (age_seconds / 86_400.0).max(0.0)
        })
        .unwrap_or(0.0)
}
