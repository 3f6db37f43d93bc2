use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod taxonomy;

pub use taxonomy::EmotionTaxonomy;

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiaryId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummaryId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DiaryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SummaryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn generate_diary_id() -> DiaryId {
    DiaryId(format!("diary_{}", ulid::Ulid::new()))
}

pub fn generate_summary_id() -> SummaryId {
    SummaryId(format!("sum_{}", ulid::Ulid::new()))
}

// ============================================================================
// Dialogue Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of the guided diary conversation, persisted on the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: Role,
    pub content: String,
}

impl DialogueTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Phase Schema
// ============================================================================

/// A named step in the guided diary-reflection conversation.
///
/// The phase tag travels with each request/response cycle as an opaque
/// cursor; the server validates it against the known graph before trusting
/// it. `Goodbye` is the only terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "explore")]
    Explore,
    #[serde(rename = "detect")]
    Detect,
    #[serde(rename = "reflect")]
    Reflect,
    #[serde(rename = "revise")]
    Revise,
    #[serde(rename = "goodbye")]
    Goodbye,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Explore => "explore",
            Phase::Detect => "detect",
            Phase::Reflect => "reflect",
            Phase::Revise => "revise",
            Phase::Goodbye => "goodbye",
        }
    }

    /// Parse a client-asserted phase tag. Unknown tags map to `None` so the
    /// caller can reject them instead of silently defaulting.
    pub fn parse(tag: &str) -> Option<Phase> {
        match tag {
            "explore" => Some(Phase::Explore),
            "detect" => Some(Phase::Detect),
            "reflect" => Some(Phase::Reflect),
            "revise" => Some(Phase::Revise),
            "goodbye" => Some(Phase::Goodbye),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Goodbye)
    }
}

// ============================================================================
// Diary Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeOfDay {
    #[serde(rename = "morning")]
    Morning,
    #[serde(rename = "noon")]
    Noon,
    #[serde(rename = "afternoon")]
    Afternoon,
    #[serde(rename = "evening")]
    Evening,
    #[serde(rename = "night")]
    Night,
    #[serde(rename = "all_day")]
    AllDay,
}

impl TimeOfDay {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Noon => "noon",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
            TimeOfDay::AllDay => "all_day",
        }
    }

    pub fn parse(value: &str) -> Option<TimeOfDay> {
        match value.trim().to_lowercase().as_str() {
            "morning" => Some(TimeOfDay::Morning),
            "noon" => Some(TimeOfDay::Noon),
            "afternoon" => Some(TimeOfDay::Afternoon),
            "evening" => Some(TimeOfDay::Evening),
            "night" => Some(TimeOfDay::Night),
            "all_day" => Some(TimeOfDay::AllDay),
            _ => None,
        }
    }
}

/// Structured metadata about a diary entry's circumstances. Every axis is
/// nullable: classification is best-effort and callers must tolerate gaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiaryContext {
    pub activity: Option<String>,
    pub location: Option<String>,
    pub people: Option<String>,
    pub time_of_day: Option<TimeOfDay>,
}

impl DiaryContext {
    pub fn is_empty(&self) -> bool {
        self.activity.is_none()
            && self.location.is_none()
            && self.people.is_none()
            && self.time_of_day.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiaryEntry {
    pub id: DiaryId,
    pub user_id: UserId,
    /// Event timestamp, RFC3339.
    pub timestamp: String,
    pub content: String,
    /// Emotion labels ordered by intensity, most intense first, size 0-3.
    /// Values were valid in the taxonomy in effect at classification time;
    /// historical entries are never migrated.
    pub emotions: Vec<String>,
    pub context: DiaryContext,
    /// Causal explanation of the emotion, filled at dialogue completion.
    pub reasons: Option<String>,
    pub dialogue: Vec<DialogueTurn>,
    pub context_retention: f32,
    pub emotion_retention: f32,
    pub created_at: String, // RFC3339
}

impl DiaryEntry {
    pub fn new(user_id: UserId, timestamp: String, content: String) -> Self {
        let created_at = timestamp.clone();
        Self {
            id: generate_diary_id(),
            user_id,
            timestamp,
            content,
            emotions: Vec::new(),
            context: DiaryContext::default(),
            reasons: None,
            dialogue: Vec::new(),
            context_retention: 0.0,
            emotion_retention: 0.0,
            created_at,
        }
    }
}

// ============================================================================
// Statistic Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatCategory {
    #[serde(rename = "emotion")]
    Emotion,
    #[serde(rename = "location")]
    Location,
    #[serde(rename = "people")]
    People,
    #[serde(rename = "activity")]
    Activity,
    #[serde(rename = "time_of_day")]
    TimeOfDay,
}

impl StatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatCategory::Emotion => "emotion",
            StatCategory::Location => "location",
            StatCategory::People => "people",
            StatCategory::Activity => "activity",
            StatCategory::TimeOfDay => "time_of_day",
        }
    }

    pub fn parse(value: &str) -> Option<StatCategory> {
        match value {
            "emotion" => Some(StatCategory::Emotion),
            "location" => Some(StatCategory::Location),
            "people" => Some(StatCategory::People),
            "activity" => Some(StatCategory::Activity),
            "time_of_day" => Some(StatCategory::TimeOfDay),
            _ => None,
        }
    }
}

/// Running count per (user, category, subcategory). At most one record per
/// tuple; the count only ever increases as entries are encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticRecord {
    pub user_id: UserId,
    pub category: StatCategory,
    pub subcategory: String,
    pub quantity: u64,
}

// ============================================================================
// Weekly Summary Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionShare {
    pub emotion: String,
    /// Share of all emotion instances in the window, in [0,1].
    pub percentage: f32,
}

/// One per (user, week window); creation is idempotent by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklySummary {
    pub id: SummaryId,
    pub user_id: UserId,
    /// LLM-generated narrative paragraph (or a placeholder when the window
    /// held too few entries to summarize).
    pub content: String,
    pub start_date: String, // ISO date, always a Monday
    pub end_date: String,   // ISO date, the following Sunday
    /// ISO date -> top emotions that day, most frequent first.
    pub daily_emotions: BTreeMap<String, Vec<String>>,
    pub emotion_percentages: Vec<EmotionShare>,
    /// Distinct emotions observed across the window.
    pub weekly_emotions: Vec<String>,
    pub diary_entries: Vec<DiaryId>,
}

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnRequest {
    pub user_id: UserId,
    pub diary_id: DiaryId,
    pub diary: String,
    #[serde(default)]
    pub dialogue: Vec<DialogueTurn>,
    /// Opaque phase cursor asserted by the client, validated server-side.
    pub phase: String,
    /// Emotion labels asserted by the client for this turn, most intense
    /// first. Present from the detect phase onward.
    #[serde(default)]
    pub emotions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnResponse {
    pub phase: Phase,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDiaryRequest {
    pub user_id: UserId,
    pub timestamp: String,
    pub content: String,
}
