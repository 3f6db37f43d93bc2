use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A versioned emotion taxonomy: the canonical ordered label list plus a
/// grouping of labels into dimensions. Labels sharing a dimension are
/// considered partially similar (weight 0.5) for retrieval scoring.
///
/// Multiple incompatible taxonomies coexist across deployments (6-emotion,
/// 8-emotion, 32-emotion Plutchik); the registry is a plain config value
/// handed to the state machine, never module state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionTaxonomy {
    name: String,
    labels: Vec<String>,
    dimension_of: HashMap<String, u8>,
}

impl EmotionTaxonomy {
    /// Build a taxonomy from dimension groups: every label in a group shares
    /// one dimension id, label order across groups is the canonical order.
    pub fn from_dimension_groups(name: &str, groups: &[&[&str]]) -> Self {
        let mut labels = Vec::new();
        let mut dimension_of = HashMap::new();
        for (dimension, group) in groups.iter().enumerate() {
            for label in group.iter() {
                labels.push(label.to_string());
                dimension_of.insert(label.to_string(), dimension as u8);
            }
        }
        Self {
            name: name.to_string(),
            labels,
            dimension_of,
        }
    }

    /// Ekman's 6 basic emotions, each its own dimension.
    pub fn ekman6() -> Self {
        Self::from_dimension_groups(
            "ekman6",
            &[
                &["joy"],
                &["sadness"],
                &["disgust"],
                &["surprise"],
                &["fear"],
                &["anger"],
            ],
        )
    }

    /// Plutchik's 8 primary emotions, each its own dimension.
    pub fn plutchik8() -> Self {
        Self::from_dimension_groups(
            "plutchik8",
            &[
                &["joy"],
                &["trust"],
                &["fear"],
                &["surprise"],
                &["sadness"],
                &["disgust"],
                &["anger"],
                &["anticipation"],
            ],
        )
    }

    /// Plutchik's wheel with intensity variants and primary dyads: the eight
    /// petals each form a dimension of three intensities; each dyad blend is
    /// its own dimension.
    pub fn plutchik32() -> Self {
        Self::from_dimension_groups(
            "plutchik32",
            &[
                &["serenity", "joy", "ecstasy"],
                &["acceptance", "trust", "admiration"],
                &["apprehension", "fear", "terror"],
                &["distraction", "surprise", "amazement"],
                &["pensiveness", "sadness", "grief"],
                &["boredom", "disgust", "loathing"],
                &["annoyance", "anger", "rage"],
                &["interest", "anticipation", "vigilance"],
                &["love"],
                &["submission"],
                &["awe"],
                &["disapproval"],
                &["remorse"],
                &["contempt"],
                &["aggressiveness"],
                &["optimism"],
            ],
        )
    }

    /// Select the active taxonomy from `EMOTION_TAXONOMY`; unknown or unset
    /// values fall back to the 32-emotion wheel.
    pub fn from_env() -> Self {
        match std::env::var("EMOTION_TAXONOMY").as_deref() {
            Ok("ekman6") => Self::ekman6(),
            Ok("plutchik8") => Self::plutchik8(),
            _ => Self::plutchik32(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical ordered label list.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn contains(&self, label: &str) -> bool {
        self.dimension_of.contains_key(label)
    }

    pub fn dimension(&self, label: &str) -> Option<u8> {
        self.dimension_of.get(label).copied()
    }

    /// Pairwise label similarity: 1.0 exact match, 0.5 same dimension,
    /// 0.0 otherwise. Labels outside the taxonomy only ever match exactly.
    pub fn similarity(&self, a: &str, b: &str) -> f32 {
        if a == b {
            return 1.0;
        }
        match (self.dimension(a), self.dimension(b)) {
            (Some(da), Some(db)) if da == db => 0.5,
            _ => 0.0,
        }
    }

    /// Effective per-user label list: canonical labels plus any emotion
    /// subcategories previously recorded for the user. Novel user-coined
    /// labels stay valid for that user without polluting other users.
    pub fn effective_labels(&self, user_emotions: &[String]) -> Vec<String> {
        let mut merged = self.labels.clone();
        for emotion in user_emotions {
            if !merged.iter().any(|label| label == emotion) {
                merged.push(emotion.clone());
            }
        }
        merged
    }
}
