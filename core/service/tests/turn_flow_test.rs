use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use emodiary_dialogue::{DialogueMachine, LanguageModel};
use emodiary_retrieval::RetrievalConfig;
use emodiary_schemas::{
    ChatTurnRequest, DialogueTurn, DiaryContext, DiaryEntry, DiaryId, EmotionTaxonomy, Phase,
    StatCategory, TimeOfDay, UserId,
};
use emodiary_service::{
    backfill_summaries, consolidate_user, generate_weekly_summary, Database, SharedDatabase,
};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Replays scripted model replies in order.
struct ScriptedModel {
    replies: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        _system: &str,
        _turns: &[DialogueTurn],
        _temperature: f32,
    ) -> Result<String> {
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

fn machine() -> DialogueMachine {
    DialogueMachine::new(EmotionTaxonomy::plutchik32(), RetrievalConfig::default())
}

fn seed_history(db: &Database, user: &UserId) -> DiaryEntry {
    let mut past = DiaryEntry::new(
        user.clone(),
        "2025-02-10T19:00:00Z".to_string(),
        "Bombed the midterm, studied alone all evening.".to_string(),
    );
    past.context = DiaryContext {
        activity: Some("studying".to_string()),
        location: Some("library".to_string()),
        people: Some("alone".to_string()),
        time_of_day: Some(TimeOfDay::Evening),
    };
    past.emotions = vec!["sadness".to_string()];
    past.context_retention = 0.8;
    past.emotion_retention = 0.8;
    db.insert_diary(&past).unwrap();
    past
}

fn turn_request(
    user: &UserId,
    diary_id: &DiaryId,
    diary: &str,
    dialogue: Vec<DialogueTurn>,
    phase: &str,
    emotions: Option<Vec<&str>>,
) -> ChatTurnRequest {
    ChatTurnRequest {
        user_id: user.clone(),
        diary_id: diary_id.clone(),
        diary: diary.to_string(),
        dialogue,
        phase: phase.to_string(),
        emotions: emotions.map(|e| e.iter().map(|s| s.to_string()).collect()),
    }
}

/// Apply a turn's durable outcome the way the HTTP handler does.
async fn persist_turn(
    shared: &SharedDatabase,
    diary_id: &DiaryId,
    mut dialogue: Vec<DialogueTurn>,
    content: &str,
    effects: &emodiary_dialogue::TurnEffects,
) -> Vec<DialogueTurn> {
    dialogue.push(DialogueTurn::assistant(content));
    let db = shared.lock().await;
    db.update_after_turn(
        diary_id,
        &dialogue,
        effects.context.as_ref(),
        effects.emotions.as_deref(),
        effects.reasons.as_deref(),
    )
    .unwrap();
    dialogue
}

#[tokio::test]
async fn test_full_conversation_persists_context_emotions_and_reasons() {
    let temp = NamedTempFile::new().unwrap();
    let shared = SharedDatabase::new(Database::new(temp.path()).unwrap());
    let user = UserId("user_1".to_string());
    let machine = machine();

    {
        let db = shared.lock().await;
        seed_history(&db, &user);
    }

    let entry = DiaryEntry::new(
        user.clone(),
        "2025-03-04T21:00:00Z".to_string(),
        "Failed another exam. I studied in the library all week for nothing.".to_string(),
    );
    {
        let db = shared.lock().await;
        db.insert_diary(&entry).unwrap();
    }

    // Turn 1: details incomplete, the machine probes.
    let model = ScriptedModel::new(&[
        r#"{"event": "failed an exam", "location": "library", "people": null,
            "time_of_day": null, "skip": false, "rationale": "people unknown"}"#,
        "Were you going through this on your own, or was someone with you?",
    ]);
    let mut dialogue = vec![DialogueTurn::user(entry.content.as_str())];
    let request = turn_request(&user, &entry.id, &entry.content, dialogue.clone(), "explore", None);
    let (response, effects) = machine
        .take_turn(&model, &shared, &shared, &request)
        .await
        .unwrap();
    assert_eq!(response.phase, Phase::Explore);
    dialogue = persist_turn(&shared, &entry.id, dialogue, &response.content, &effects).await;

    // Turn 2: details complete, the machine classifies and presents emotions.
    let model = ScriptedModel::new(&[
        r#"{"event": "failed an exam", "location": "library", "people": "alone",
            "time_of_day": "evening", "skip": false, "rationale": "all gathered"}"#,
        r#"{"activity": "studying", "location": "library", "people": "alone",
            "time_of_day": "evening", "rationale": "exam prep in the library"}"#,
        r#"{"emotions": ["sadness", "disgust"], "rationale": "the wasted effort stings"}"#,
        "It sounds like you mostly felt sadness, with some disgust at the wasted effort. Does that match?",
    ]);
    dialogue.push(DialogueTurn::user("I was alone, as always."));
    let request = turn_request(&user, &entry.id, &entry.content, dialogue.clone(), "explore", None);
    let (response, effects) = machine
        .take_turn(&model, &shared, &shared, &request)
        .await
        .unwrap();
    assert_eq!(response.phase, Phase::Detect);
    let emotions = response.emotions.clone().unwrap();
    assert_eq!(emotions, vec!["sadness".to_string(), "disgust".to_string()]);
    dialogue = persist_turn(&shared, &entry.id, dialogue, &response.content, &effects).await;

    {
        let db = shared.lock().await;
        let stored = db.get_diary(&entry.id).unwrap().unwrap();
        assert_eq!(stored.emotions, emotions);
        assert_eq!(stored.context.location.as_deref(), Some("library"));
        assert_eq!(stored.context.time_of_day, Some(TimeOfDay::Evening));

        // Classification and inference feed the per-user counters.
        let seen = db
            .distinct_subcategories(&user, StatCategory::Emotion)
            .unwrap();
        assert!(seen.contains(&"sadness".to_string()));
        let locations = db
            .distinct_subcategories(&user, StatCategory::Location)
            .unwrap();
        assert!(locations.contains(&"library".to_string()));
    }

    // Turn 3: user reacts; the machine reflects against the seeded history.
    let model = ScriptedModel::new(&[
        "You went through something similar after the midterm last month, and that sadness passed with time.",
        "Does sadness and disgust capture it, or would you put it differently?",
    ]);
    dialogue.push(DialogueTurn::user("Yeah, that sounds about right I guess."));
    let request = turn_request(
        &user,
        &entry.id,
        &entry.content,
        dialogue.clone(),
        "detect",
        Some(vec!["sadness", "disgust"]),
    );
    let (response, effects) = machine
        .take_turn(&model, &shared, &shared, &request)
        .await
        .unwrap();
    assert_eq!(response.phase, Phase::Reflect);
    dialogue = persist_turn(&shared, &entry.id, dialogue, &response.content, &effects).await;

    // Turn 4: user confirms, the conversation closes with a causal summary.
    let model = ScriptedModel::new(&[
        r#"{"response": "true", "rationale": "studying hard and still failing felt unfair"}"#,
        "Thank you for sharing this with me. Be kind to yourself tonight.",
    ]);
    dialogue.push(DialogueTurn::user("Yes, exactly that."));
    let request = turn_request(
        &user,
        &entry.id,
        &entry.content,
        dialogue.clone(),
        "reflect",
        Some(vec!["sadness", "disgust"]),
    );
    let (response, effects) = machine
        .take_turn(&model, &shared, &shared, &request)
        .await
        .unwrap();
    assert_eq!(response.phase, Phase::Goodbye);
    persist_turn(&shared, &entry.id, dialogue, &response.content, &effects).await;

    let db = shared.lock().await;
    let stored = db.get_diary(&entry.id).unwrap().unwrap();
    assert_eq!(
        stored.reasons.as_deref(),
        Some("studying hard and still failing felt unfair")
    );
    assert!(stored.dialogue.len() >= 8);
}

#[tokio::test]
async fn test_revision_path_replaces_rejected_emotions() {
    let temp = NamedTempFile::new().unwrap();
    let shared = SharedDatabase::new(Database::new(temp.path()).unwrap());
    let user = UserId("user_1".to_string());
    let machine = machine();

    let entry = DiaryEntry::new(
        user.clone(),
        "2025-03-04T21:00:00Z".to_string(),
        "My roommate ate my leftovers again.".to_string(),
    );
    {
        let db = shared.lock().await;
        db.insert_diary(&entry).unwrap();
    }

    let model = ScriptedModel::new(&[
        r#"{"response": "false", "rationale": "user says it was not sadness but anger"}"#,
        r#"{"emotions": ["annoyance", "anger"], "rationale": "repeated boundary crossing"}"#,
        "Maybe it was closer to annoyance building into anger. Does that fit better?",
    ]);
    let dialogue = vec![
        DialogueTurn::user("My roommate ate my leftovers again."),
        DialogueTurn::assistant("It sounds like sadness. Does that match?"),
        DialogueTurn::user("Not sad. More like fed up."),
    ];
    let request = turn_request(
        &user,
        &entry.id,
        &entry.content,
        dialogue.clone(),
        "reflect",
        Some(vec!["sadness"]),
    );
    let (response, effects) = machine
        .take_turn(&model, &shared, &shared, &request)
        .await
        .unwrap();

    assert_eq!(response.phase, Phase::Revise);
    let revised = response.emotions.unwrap();
    assert_eq!(revised, vec!["annoyance".to_string(), "anger".to_string()]);

    persist_turn(&shared, &entry.id, dialogue, &response.content, &effects).await;
    let db = shared.lock().await;
    let stored = db.get_diary(&entry.id).unwrap().unwrap();
    assert_eq!(stored.emotions, revised);
}

#[tokio::test]
async fn test_consolidation_then_weekly_summary() {
    let temp = NamedTempFile::new().unwrap();
    let shared = SharedDatabase::new(Database::new(temp.path()).unwrap());
    let user = UserId("user_1".to_string());

    {
        let db = shared.lock().await;
        for (ts, emotions) in [
            ("2025-03-03T09:00:00Z", vec!["sadness"]),
            ("2025-03-05T20:00:00Z", vec!["sadness", "anger"]),
            ("2025-03-08T12:00:00Z", vec!["joy"]),
        ] {
            let mut entry = DiaryEntry::new(
                user.clone(),
                ts.to_string(),
                format!("Entry from {}", ts),
            );
            entry.context = DiaryContext {
                activity: Some("studying".to_string()),
                location: Some("library".to_string()),
                people: Some("alone".to_string()),
                time_of_day: Some(TimeOfDay::Evening),
            };
            entry.emotions = emotions.iter().map(|s| s.to_string()).collect();
            db.insert_diary(&entry).unwrap();
        }
    }

    let now = chrono::DateTime::parse_from_rfc3339("2025-03-12T09:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);

    {
        let db = shared.lock().await;
        let updated = consolidate_user(
            &db,
            &EmotionTaxonomy::plutchik32(),
            &RetrievalConfig::default().weights,
            &user,
            now,
        )
        .unwrap();
        assert_eq!(updated, 3);

        for entry in db.list_diaries(&user).unwrap() {
            assert!((0.0..=1.0).contains(&entry.context_retention));
            assert!((0.0..=1.0).contains(&entry.emotion_retention));
        }
    }

    let db = shared.lock().await;
    let start = NaiveDate::parse_from_str("2025-03-03", "%Y-%m-%d").unwrap();
    let summary = generate_weekly_summary(
        &db,
        &ScriptedModel::new(&["A heavy week that lifted by the weekend."]),
        &user,
        start,
    )
    .await
    .unwrap();

    assert_eq!(summary.diary_entries.len(), 3);
    assert_eq!(summary.emotion_percentages[0].emotion, "sadness");
    assert!(summary.content.contains("lifted"));

    // Backfill finds the stored summary and adds nothing new for that week.
    let today = NaiveDate::parse_from_str("2025-03-12", "%Y-%m-%d").unwrap();
    let summaries = backfill_summaries(
        &db,
        &ScriptedModel::new(&[]),
        &user,
        today,
    )
    .await
    .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, summary.id);
}
