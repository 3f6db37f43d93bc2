use emodiary_schemas::{DiaryContext, EmotionTaxonomy};

/// Per-axis weights for context similarity. The default weighs all four
/// axes equally; `activity_heavy` is the alternative scheme that biases
/// toward the activity axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextWeights {
    pub activity: f32,
    pub location: f32,
    pub people: f32,
    pub time_of_day: f32,
}

impl Default for ContextWeights {
    fn default() -> Self {
        Self {
            activity: 0.25,
            location: 0.25,
            people: 0.25,
            time_of_day: 0.25,
        }
    }
}

impl ContextWeights {
    pub fn activity_heavy() -> Self {
        Self {
            activity: 0.4,
            location: 0.25,
            people: 0.25,
            time_of_day: 0.1,
        }
    }
}

/// Indicator-weighted context similarity: each axis contributes its weight
/// when both sides carry the same non-null value. Two entries with no
/// context at all score 0, never 1.
pub fn context_similarity(weights: &ContextWeights, a: &DiaryContext, b: &DiaryContext) -> f32 {
    let mut score = 0.0;
    if axis_matches(a.activity.as_deref(), b.activity.as_deref()) {
        score += weights.activity;
    }
    if axis_matches(a.location.as_deref(), b.location.as_deref()) {
        score += weights.location;
    }
    if axis_matches(a.people.as_deref(), b.people.as_deref()) {
        score += weights.people;
    }
    if let (Some(ta), Some(tb)) = (a.time_of_day, b.time_of_day) {
        if ta == tb {
            score += weights.time_of_day;
        }
    }
    score
}

fn axis_matches(a: Option<&str>, b: Option<&str>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

/// Emotion-set similarity: sum over all (current, past) label pairs of
/// 1.0 for an exact match and 0.5 for a shared taxonomy dimension.
pub fn emotion_similarity(taxonomy: &EmotionTaxonomy, current: &[String], past: &[String]) -> f32 {
    let mut score = 0.0;
    for a in current {
        for b in past {
            score += taxonomy.similarity(a, b);
        }
    }
    score
}

/// Min-max scale to [0,1]. A constant (or single-element) input is returned
/// unchanged: there is nothing to rescale and no divide-by-zero.
pub fn min_max_scale(values: &[f32]) -> Vec<f32> {
    let Some(max) = values.iter().copied().reduce(f32::max) else {
        return Vec::new();
    };
    let min = values.iter().copied().fold(max, f32::min);
    if max - min == 0.0 {
        return values.to_vec();
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}
