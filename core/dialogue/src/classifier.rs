use emodiary_schemas::{DialogueTurn, DiaryContext, StatCategory, TimeOfDay, UserId};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::{generate_analysis, LanguageModel};
use crate::parse::{decode_or_text, Decoded};
use crate::store::StatisticStore;

pub const DEFAULT_ACTIVITIES: &[&str] = &[
    "studying",
    "research",
    "resting",
    "meeting",
    "eating",
    "socializing",
    "leisure activity",
    "exercise",
    "moving",
];

pub const DEFAULT_LOCATIONS: &[&str] = &[
    "home",
    "classroom",
    "library",
    "restaurant",
    "office",
    "laboratory",
];

pub const DEFAULT_PEOPLE: &[&str] = &[
    "alone",
    "family",
    "boyfriend",
    "girlfriend",
    "roommate",
    "friend",
    "colleague",
    "professor",
];

#[derive(Debug, Clone, Default)]
pub struct ClassifiedContext {
    pub context: DiaryContext,
    pub rationale: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawContext {
    #[serde(default)]
    activity: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    people: Option<String>,
    #[serde(default)]
    time_of_day: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Infer structured context from diary text and dialogue.
///
/// Category hints are seeded from the user's own historical subcategories
/// plus the default vocabulary per axis, so classification personalizes over
/// time. Parse failure is not fatal: every field comes back null and the
/// rationale empty, so callers must tolerate partial context.
pub async fn classify_context(
    llm: &dyn LanguageModel,
    stats: &dyn StatisticStore,
    user: Option<&UserId>,
    diary: &str,
    dialogue: &[DialogueTurn],
) -> ClassifiedContext {
    let activity_hints = known_categories(stats, user, StatCategory::Activity, DEFAULT_ACTIVITIES).await;
    let location_hints = known_categories(stats, user, StatCategory::Location, DEFAULT_LOCATIONS).await;
    let people_hints = known_categories(stats, user, StatCategory::People, DEFAULT_PEOPLE).await;

    let instruction = format!(
        r#"Based on diary and dialog, classify contextual information into category.
Use JSON format with the following properties:
- activity: detect the key activity in the diary and return the category it belongs to. Consider these categories: {activities}. If it doesn't belong to any of those, generate a suitable category label. Return only one main activity. Don't return "other".
- location: detect where the event happened and return the category it belongs to. Consider these categories: {locations}. If it doesn't belong to any of those, generate a suitable category label. Return only one location label related to the activity. Don't return "other".
- people: detect who caused those emotions and return the category it belongs to. Consider these categories: {people}. If it doesn't belong to any of those, generate a suitable category label. Return only one people label related to the activity. Don't return "other".
- time_of_day: what time of day did the event happen. Only use one of the following: morning, noon, afternoon, evening, night, all_day. Return only one word.
- rationale: describe your rationale on how properties were derived.
{{
    "activity": string | null,
    "location": string | null,
    "people": string | null,
    "time_of_day": string | null,
    "rationale": string
}}"#,
        activities = activity_hints.join(", "),
        locations = location_hints.join(", "),
        people = people_hints.join(", "),
    );

    let raw = match generate_analysis(llm, diary, dialogue, &instruction).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!("Context classification call failed: {}", err);
            return ClassifiedContext::default();
        }
    };

    match decode_or_text::<RawContext>(&raw) {
        Decoded::Parsed(fields) => {
            let context = DiaryContext {
                activity: normalize_category(fields.activity),
                location: normalize_category(fields.location),
                people: normalize_category(fields.people),
                time_of_day: fields.time_of_day.as_deref().and_then(TimeOfDay::parse),
            };
            debug!("Classified context: {:?}", context);
            ClassifiedContext {
                context,
                rationale: fields.rationale.unwrap_or_default(),
            }
        }
        Decoded::Raw(_) => {
            warn!("Context classification returned malformed JSON");
            ClassifiedContext::default()
        }
    }
}

/// Record resolved context fields as statistic increments for the user, so
/// future classification prefers previously-seen categories. Failures are
/// logged and swallowed: a missed count never aborts the caller's turn.
pub async fn record_context(stats: &dyn StatisticStore, user: &UserId, context: &DiaryContext) {
    let mut pairs: Vec<(StatCategory, &str)> = Vec::new();
    if let Some(activity) = context.activity.as_deref() {
        pairs.push((StatCategory::Activity, activity));
    }
    if let Some(location) = context.location.as_deref() {
        pairs.push((StatCategory::Location, location));
    }
    if let Some(people) = context.people.as_deref() {
        pairs.push((StatCategory::People, people));
    }
    if let Some(time_of_day) = context.time_of_day {
        pairs.push((StatCategory::TimeOfDay, time_of_day.as_str()));
    }

    for (category, subcategory) in pairs {
        if let Err(err) = stats.increment(user, category, subcategory).await {
            warn!("Failed to record {} statistic: {}", category.as_str(), err);
        }
    }
}

/// Record classified emotions as statistic increments.
pub async fn record_emotions(stats: &dyn StatisticStore, user: &UserId, emotions: &[String]) {
    for emotion in emotions {
        if let Err(err) = stats.increment(user, StatCategory::Emotion, emotion).await {
            warn!("Failed to record emotion statistic: {}", err);
        }
    }
}

async fn known_categories(
    stats: &dyn StatisticStore,
    user: Option<&UserId>,
    category: StatCategory,
    defaults: &[&str],
) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    if let Some(user) = user {
        match stats.distinct_subcategories(user, category).await {
            Ok(seen) => merged.extend(seen),
            Err(err) => warn!(
                "Failed to load {} categories for {}: {}",
                category.as_str(),
                user,
                err
            ),
        }
    }
    for default in defaults {
        if !merged.iter().any(|existing| existing == default) {
            merged.push(default.to_string());
        }
    }
    merged
}

// The model is told to never answer the literal "other"; drop it anyway.
fn normalize_category(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v.to_lowercase() != "other" && v.to_lowercase() != "null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubModel(&'static str);

    #[async_trait]
    impl LanguageModel for StubModel {
        async fn generate(
            &self,
            _system: &str,
            _turns: &[DialogueTurn],
            _temperature: f32,
        ) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct MemoryStats {
        increments: Mutex<Vec<(StatCategory, String)>>,
        seen: Vec<String>,
    }

    #[async_trait]
    impl StatisticStore for MemoryStats {
        async fn distinct_subcategories(
            &self,
            _user: &UserId,
            _category: StatCategory,
        ) -> Result<Vec<String>> {
            Ok(self.seen.clone())
        }

        async fn increment(
            &self,
            _user: &UserId,
            category: StatCategory,
            subcategory: &str,
        ) -> Result<()> {
            self.increments
                .lock()
                .unwrap()
                .push((category, subcategory.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_classify_parses_structured_reply() {
        let model = StubModel(
            r#"{"activity": "studying", "location": "library", "people": "alone",
                "time_of_day": "afternoon", "rationale": "mentioned exam prep"}"#,
        );
        let stats = MemoryStats::default();
        let user = UserId("user_1".to_string());

        let classified = classify_context(&model, &stats, Some(&user), "Exam prep.", &[]).await;
        assert_eq!(classified.context.activity.as_deref(), Some("studying"));
        assert_eq!(
            classified.context.time_of_day,
            Some(TimeOfDay::Afternoon)
        );
        assert_eq!(classified.rationale, "mentioned exam prep");
    }

    #[tokio::test]
    async fn test_malformed_reply_yields_empty_context() {
        let model = StubModel("not json");
        let stats = MemoryStats::default();

        let classified = classify_context(&model, &stats, None, "diary", &[]).await;
        assert!(classified.context.is_empty());
        assert!(classified.rationale.is_empty());
    }

    #[tokio::test]
    async fn test_other_and_invalid_time_are_dropped() {
        let model = StubModel(
            r#"{"activity": "Other", "location": "home", "people": null,
                "time_of_day": "dawn", "rationale": ""}"#,
        );
        let stats = MemoryStats::default();

        let classified = classify_context(&model, &stats, None, "diary", &[]).await;
        assert!(classified.context.activity.is_none());
        assert_eq!(classified.context.location.as_deref(), Some("home"));
        assert!(classified.context.time_of_day.is_none());
    }

    #[tokio::test]
    async fn test_record_context_increments_resolved_fields() {
        let stats = MemoryStats::default();
        let user = UserId("user_1".to_string());
        let context = DiaryContext {
            activity: Some("studying".to_string()),
            location: None,
            people: Some("alone".to_string()),
            time_of_day: Some(TimeOfDay::Night),
        };

        record_context(&stats, &user, &context).await;
        let increments = stats.increments.lock().unwrap();
        assert_eq!(increments.len(), 3);
        assert!(increments.contains(&(StatCategory::TimeOfDay, "night".to_string())));
    }
}
