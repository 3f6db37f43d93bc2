use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate};
use emodiary_dialogue::llm::ANALYSIS_TEMPERATURE;
use emodiary_dialogue::LanguageModel;
use emodiary_schemas::{
    generate_summary_id, DiaryEntry, EmotionShare, UserId, WeeklySummary,
};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

use crate::database::Database;

const EMPTY_WEEK_CONTENT: &str = "No diary entries were recorded this week.";

/// Monday through Sunday of the week containing `date`.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    (monday, monday + Duration::days(6))
}

/// The most recent fully elapsed Monday-to-Sunday week as of `today`.
pub fn last_completed_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let (this_monday, _) = week_bounds(today);
    let start = this_monday - Duration::days(7);
    (start, start + Duration::days(6))
}

/// Produce (or fetch) the summary for the week starting at `start`, which
/// must be a Monday. An already-stored summary is returned as-is, so
/// repeated calls never re-invoke the model for the same week.
pub async fn generate_weekly_summary(
    db: &Database,
    llm: &dyn LanguageModel,
    user: &UserId,
    start: NaiveDate,
) -> Result<WeeklySummary> {
    let end = start + Duration::days(6);
    let start_str = start.to_string();
    let end_str = end.to_string();

    if let Some(existing) = db.get_summary(user, &start_str, &end_str)? {
        return Ok(existing);
    }

    let entries = db.list_diaries_between(
        user,
        &format!("{}T00:00:00Z", start),
        &format!("{}T00:00:00Z", end + Duration::days(1)),
    )?;

    let summary = if entries.is_empty() {
        WeeklySummary {
            id: generate_summary_id(),
            user_id: user.clone(),
            content: EMPTY_WEEK_CONTENT.to_string(),
            start_date: start_str,
            end_date: end_str,
            daily_emotions: BTreeMap::new(),
            emotion_percentages: Vec::new(),
            weekly_emotions: Vec::new(),
            diary_entries: Vec::new(),
        }
    } else {
        let daily_emotions = daily_emotions(&entries);
        let emotion_percentages = emotion_percentages(&entries);
        let weekly_emotions: Vec<String> = emotion_percentages
            .iter()
            .map(|share| share.emotion.clone())
            .collect();
        let content = narrate_week(llm, &entries).await?;

        WeeklySummary {
            id: generate_summary_id(),
            user_id: user.clone(),
            content,
            start_date: start_str,
            end_date: end_str,
            daily_emotions,
            emotion_percentages,
            weekly_emotions,
            diary_entries: entries.iter().map(|e| e.id.clone()).collect(),
        }
    };

    db.upsert_summary(&summary)?;
    info!(
        "Generated weekly summary for {} ({} to {}, {} entries)",
        user,
        summary.start_date,
        summary.end_date,
        summary.diary_entries.len()
    );
    Ok(summary)
}

/// Generate summaries for every completed week from the user's first entry
/// up to the most recent completed one, oldest first. Weeks that already
/// have a summary are returned from storage untouched.
pub async fn backfill_summaries(
    db: &Database,
    llm: &dyn LanguageModel,
    user: &UserId,
    today: NaiveDate,
) -> Result<Vec<WeeklySummary>> {
    let earliest = match db.earliest_diary_timestamp(user)? {
        Some(ts) => ts,
        None => return Ok(Vec::new()),
    };
    let first_date = DateTime::parse_from_rfc3339(&earliest)
        .map(|ts| ts.date_naive())
        .unwrap_or(today);

    let (mut start, _) = week_bounds(first_date);
    let (last_start, _) = last_completed_week(today);

    let mut summaries = Vec::new();
    while start <= last_start {
        summaries.push(generate_weekly_summary(db, llm, user, start).await?);
        start += Duration::days(7);
    }
    Ok(summaries)
}

fn daily_emotions(entries: &[DiaryEntry]) -> BTreeMap<String, Vec<String>> {
    let mut days: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        let day = DateTime::parse_from_rfc3339(&entry.timestamp)
            .map(|ts| ts.date_naive().to_string())
            .unwrap_or_else(|_| entry.timestamp.clone());
        let emotions = days.entry(day).or_default();
        for emotion in &entry.emotions {
            if !emotions.contains(emotion) {
                emotions.push(emotion.clone());
            }
        }
    }
    days
}

/// Share of each emotion among all emotion instances in the window, largest
/// first.
fn emotion_percentages(entries: &[DiaryEntry]) -> Vec<EmotionShare> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    for entry in entries {
        for emotion in &entry.emotions {
            *counts.entry(emotion).or_default() += 1;
            total += 1;
        }
    }
    if total == 0 {
        return Vec::new();
    }

    let mut shares: Vec<EmotionShare> = counts
        .into_iter()
        .map(|(emotion, count)| EmotionShare {
            emotion: emotion.to_string(),
            percentage: count as f32 / total as f32,
        })
        .collect();
    shares.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    shares
}

async fn narrate_week(llm: &dyn LanguageModel, entries: &[DiaryEntry]) -> Result<String> {
    let digest: Vec<serde_json::Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "date": DateTime::parse_from_rfc3339(&entry.timestamp)
                    .map(|ts| ts.date_naive().to_string())
                    .unwrap_or_else(|_| entry.timestamp.clone()),
                "diary": entry.content,
                "emotions": entry.emotions,
                "reasons": entry.reasons,
            })
        })
        .collect();

    let system = format!(
        "You are a warm, empathetic diary companion writing a weekly recap.\n\
Summarize the user's week in a short paragraph: the notable events, how \
they felt, and any pattern worth gently pointing out. Address the user as \
\"you\" and do not invent events that are not in the entries.\n\
This week's entries: {}",
        serde_json::to_string(&digest)?
    );

    let content = llm.generate(&system, &[], ANALYSIS_TEMPERATURE).await?;
    if content.trim().is_empty() {
        anyhow::bail!("empty model response");
    }
    Ok(content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use emodiary_schemas::DialogueTurn;
    use tempfile::NamedTempFile;

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

    /// Fails the test if the model is consulted at all.
    struct UnusableModel;

    #[async_trait]
    impl LanguageModel for UnusableModel {
        async fn generate(
            &self,
            _system: &str,
            _turns: &[DialogueTurn],
            _temperature: f32,
        ) -> Result<String> {
            panic!("model should not be called");
        }
    }

    fn entry(user: &str, ts: &str, emotions: &[&str]) -> DiaryEntry {
        let mut e = DiaryEntry::new(
            UserId(user.to_string()),
            ts.to_string(),
            "entry".to_string(),
        );
        e.emotions = emotions.iter().map(|s| s.to_string()).collect();
        e
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_week_bounds_are_monday_to_sunday() {
        // 2025-03-05 is a Wednesday.
        let (start, end) = week_bounds(date("2025-03-05"));
        assert_eq!(start, date("2025-03-03"));
        assert_eq!(end, date("2025-03-09"));

        // A Monday is its own week start.
        let (start, _) = week_bounds(date("2025-03-03"));
        assert_eq!(start, date("2025-03-03"));
    }

    #[test]
    fn test_last_completed_week() {
        // From a mid-week vantage point the previous full week is returned.
        let (start, end) = last_completed_week(date("2025-03-05"));
        assert_eq!(start, date("2025-02-24"));
        assert_eq!(end, date("2025-03-02"));

        // Sunday still counts as inside the current, incomplete week.
        let (start, _) = last_completed_week(date("2025-03-09"));
        assert_eq!(start, date("2025-02-24"));
    }

    #[tokio::test]
    async fn test_empty_week_gets_placeholder_without_model_call() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        let user = UserId("user_1".to_string());

        let summary = generate_weekly_summary(&db, &UnusableModel, &user, date("2025-03-03"))
            .await
            .unwrap();

        assert_eq!(summary.content, EMPTY_WEEK_CONTENT);
        assert!(summary.diary_entries.is_empty());
        assert!(summary.emotion_percentages.is_empty());
        assert_eq!(db.count_summaries().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_summary_aggregates_week_entries() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        let user = UserId("user_1".to_string());

        db.insert_diary(&entry("user_1", "2025-03-03T09:00:00Z", &["sadness"]))
            .unwrap();
        db.insert_diary(&entry("user_1", "2025-03-03T20:00:00Z", &["sadness", "anger"]))
            .unwrap();
        db.insert_diary(&entry("user_1", "2025-03-07T12:00:00Z", &["joy"]))
            .unwrap();
        // Outside the week, must not be counted.
        db.insert_diary(&entry("user_1", "2025-03-10T09:00:00Z", &["fear"]))
            .unwrap();

        let summary = generate_weekly_summary(
            &db,
            &StubModel("A hard start, but the week ended on a bright note."),
            &user,
            date("2025-03-03"),
        )
        .await
        .unwrap();

        assert_eq!(summary.diary_entries.len(), 3);
        assert_eq!(summary.daily_emotions["2025-03-03"], vec!["sadness", "anger"]);
        assert_eq!(summary.daily_emotions["2025-03-07"], vec!["joy"]);

        // sadness 2/4, anger 1/4, joy 1/4.
        assert_eq!(summary.emotion_percentages[0].emotion, "sadness");
        assert!((summary.emotion_percentages[0].percentage - 0.5).abs() < 1e-6);
        assert_eq!(summary.weekly_emotions.len(), 3);
        assert!(summary.content.contains("bright note"));
    }

    #[tokio::test]
    async fn test_existing_summary_is_not_regenerated() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        let user = UserId("user_1".to_string());

        db.insert_diary(&entry("user_1", "2025-03-04T09:00:00Z", &["joy"]))
            .unwrap();

        let first = generate_weekly_summary(&db, &StubModel("First pass."), &user, date("2025-03-03"))
            .await
            .unwrap();

        // Second call must come from storage, not the model.
        let second = generate_weekly_summary(&db, &UnusableModel, &user, date("2025-03-03"))
            .await
            .unwrap();
        assert_eq!(first.content, second.content);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_backfill_covers_every_week_since_first_entry() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        let user = UserId("user_1".to_string());

        db.insert_diary(&entry("user_1", "2025-02-19T09:00:00Z", &["joy"]))
            .unwrap();
        db.insert_diary(&entry("user_1", "2025-03-04T09:00:00Z", &["sadness"]))
            .unwrap();

        // Today is Wed 2025-03-12; completed weeks are Feb 17, Feb 24, Mar 3.
        let summaries = backfill_summaries(&db, &StubModel("Recap."), &user, date("2025-03-12"))
            .await
            .unwrap();

        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].start_date, "2025-02-17");
        assert_eq!(summaries[1].start_date, "2025-02-24");
        assert_eq!(summaries[1].content, EMPTY_WEEK_CONTENT);
        assert_eq!(summaries[2].start_date, "2025-03-03");
    }

    #[tokio::test]
    async fn test_backfill_with_no_entries() {
        let temp = NamedTempFile::new().unwrap();
        let db = Database::new(temp.path()).unwrap();
        let user = UserId("user_1".to_string());

        let summaries = backfill_summaries(&db, &UnusableModel, &user, date("2025-03-12"))
            .await
            .unwrap();
        assert!(summaries.is_empty());
    }
}
