use anyhow::Result;
use async_trait::async_trait;
use emodiary_dialogue::{DiaryStore, StatisticStore};
use emodiary_schemas::{
    DialogueTurn, DiaryContext, DiaryEntry, DiaryId, StatCategory, StatisticRecord, SummaryId,
    TimeOfDay, UserId, WeeklySummary,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let db = Self { conn };
        db.init_schema()?;

        info!("Database initialized");
        Ok(db)
    }

    /// Create all tables and indexes
    fn init_schema(&self) -> Result<()> {
        // Diaries (one row per entry, dialogue and emotions stored as JSON)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS diaries (
                id TEXT PRIMARY KEY,
                userid TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                content TEXT NOT NULL,
                emotions TEXT NOT NULL DEFAULT '[]',
                activity TEXT,
                location TEXT,
                people TEXT,
                time_of_day TEXT,
                reasons TEXT,
                dialogue TEXT NOT NULL DEFAULT '[]',
                context_retention REAL NOT NULL DEFAULT 0,
                emotion_retention REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_diaries_user_time
             ON diaries(userid, timestamp)",
            [],
        )?;

        // Per-user category counters, one row per (user, category, label)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS statistics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                userid TEXT NOT NULL,
                category TEXT NOT NULL,
                subcategory TEXT NOT NULL,
                quantity INTEGER NOT NULL DEFAULT 1,
                UNIQUE(userid, category, subcategory)
            )",
            [],
        )?;

        // Weekly summaries, one row per (user, week)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS summaries (
                id TEXT PRIMARY KEY,
                userid TEXT NOT NULL,
                content TEXT NOT NULL,
                startdate TEXT NOT NULL,
                enddate TEXT NOT NULL,
                daily_emotions TEXT NOT NULL DEFAULT '{}',
                emotion_percentages TEXT NOT NULL DEFAULT '[]',
                weekly_emotions TEXT NOT NULL DEFAULT '[]',
                diary_entries TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                UNIQUE(userid, startdate, enddate)
            )",
            [],
        )?;

        Ok(())
    }

    // ========== DIARIES ==========

    pub fn insert_diary(&self, entry: &DiaryEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO diaries (id, userid, timestamp, content, emotions, activity,
                location, people, time_of_day, reasons, dialogue,
                context_retention, emotion_retention, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                entry.id.0,
                entry.user_id.0,
                entry.timestamp,
                entry.content,
                serde_json::to_string(&entry.emotions)?,
                entry.context.activity,
                entry.context.location,
                entry.context.people,
                entry.context.time_of_day.map(|t| t.as_str()),
                entry.reasons,
                serde_json::to_string(&entry.dialogue)?,
                entry.context_retention,
                entry.emotion_retention,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_diary(&self, id: &DiaryId) -> Result<Option<DiaryEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, userid, timestamp, content, emotions, activity, location,
                        people, time_of_day, reasons, dialogue, context_retention,
                        emotion_retention, created_at
                 FROM diaries WHERE id = ?1",
                params![id.0],
                row_to_diary,
            )
            .optional()?;
        Ok(entry)
    }

    /// Delete a diary entry. Returns false when no such entry existed.
    pub fn delete_diary(&self, id: &DiaryId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM diaries WHERE id = ?1", params![id.0])?;
        Ok(deleted > 0)
    }

    pub fn list_diaries(&self, user: &UserId) -> Result<Vec<DiaryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, userid, timestamp, content, emotions, activity, location,
                    people, time_of_day, reasons, dialogue, context_retention,
                    emotion_retention, created_at
             FROM diaries WHERE userid = ?1 ORDER BY timestamp ASC",
        )?;
        let entries = stmt
            .query_map(params![user.0], row_to_diary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Entries whose timestamp falls in `[start, end)`, RFC3339 boundaries.
    pub fn list_diaries_between(
        &self,
        user: &UserId,
        start: &str,
        end: &str,
    ) -> Result<Vec<DiaryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, userid, timestamp, content, emotions, activity, location,
                    people, time_of_day, reasons, dialogue, context_retention,
                    emotion_retention, created_at
             FROM diaries
             WHERE userid = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp ASC",
        )?;
        let entries = stmt
            .query_map(params![user.0, start, end], row_to_diary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn earliest_diary_timestamp(&self, user: &UserId) -> Result<Option<String>> {
        let ts = self
            .conn
            .query_row(
                "SELECT MIN(timestamp) FROM diaries WHERE userid = ?1",
                params![user.0],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(ts)
    }

    /// Persist the durable outcome of one dialogue turn. Only the fields the
    /// turn actually produced are touched.
    pub fn update_after_turn(
        &self,
        id: &DiaryId,
        dialogue: &[DialogueTurn],
        context: Option<&DiaryContext>,
        emotions: Option<&[String]>,
        reasons: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE diaries SET dialogue = ?2 WHERE id = ?1",
            params![id.0, serde_json::to_string(dialogue)?],
        )?;

        if let Some(context) = context {
            self.conn.execute(
                "UPDATE diaries SET activity = ?2, location = ?3, people = ?4,
                        time_of_day = ?5
                 WHERE id = ?1",
                params![
                    id.0,
                    context.activity,
                    context.location,
                    context.people,
                    context.time_of_day.map(|t| t.as_str()),
                ],
            )?;
        }

        if let Some(emotions) = emotions {
            self.conn.execute(
                "UPDATE diaries SET emotions = ?2 WHERE id = ?1",
                params![id.0, serde_json::to_string(emotions)?],
            )?;
        }

        if let Some(reasons) = reasons {
            self.conn.execute(
                "UPDATE diaries SET reasons = ?2 WHERE id = ?1",
                params![id.0, reasons],
            )?;
        }

        Ok(())
    }

    pub fn set_retention(
        &self,
        id: &DiaryId,
        context_retention: f32,
        emotion_retention: f32,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE diaries SET context_retention = ?2, emotion_retention = ?3
             WHERE id = ?1",
            params![id.0, context_retention, emotion_retention],
        )?;
        Ok(())
    }

    pub fn count_diaries(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM diaries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== STATISTICS ==========

    /// Bump the counter for (user, category, subcategory), creating it at 1.
    /// The upsert is atomic; concurrent turns never lose increments.
    pub fn increment_statistic(
        &self,
        user: &UserId,
        category: StatCategory,
        subcategory: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO statistics (userid, category, subcategory, quantity)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(userid, category, subcategory)
             DO UPDATE SET quantity = quantity + 1",
            params![user.0, category.as_str(), subcategory],
        )?;
        Ok(())
    }

    /// Labels this user has accumulated in a category, most frequent first.
    pub fn distinct_subcategories(
        &self,
        user: &UserId,
        category: StatCategory,
    ) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT subcategory FROM statistics
             WHERE userid = ?1 AND category = ?2
             ORDER BY quantity DESC, subcategory ASC",
        )?;
        let labels = stmt
            .query_map(params![user.0, category.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    pub fn user_statistics(&self, user: &UserId) -> Result<Vec<StatisticRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT userid, category, subcategory, quantity FROM statistics
             WHERE userid = ?1
             ORDER BY category ASC, quantity DESC",
        )?;
        let records = stmt
            .query_map(params![user.0], |row| {
                let category: String = row.get(1)?;
                Ok(StatisticRecord {
                    user_id: UserId(row.get(0)?),
                    category: StatCategory::parse(&category).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            Type::Text,
                            format!("unknown category: {}", category).into(),
                        )
                    })?,
                    subcategory: row.get(2)?,
                    quantity: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ========== SUMMARIES ==========

    /// Insert or replace the summary for its (user, week) slot.
    pub fn upsert_summary(&self, summary: &WeeklySummary) -> Result<()> {
        self.conn.execute(
            "INSERT INTO summaries (id, userid, content, startdate, enddate,
                daily_emotions, emotion_percentages, weekly_emotions,
                diary_entries, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(userid, startdate, enddate) DO UPDATE SET
                content = excluded.content,
                daily_emotions = excluded.daily_emotions,
                emotion_percentages = excluded.emotion_percentages,
                weekly_emotions = excluded.weekly_emotions,
                diary_entries = excluded.diary_entries",
            params![
                summary.id.0,
                summary.user_id.0,
                summary.content,
                summary.start_date,
                summary.end_date,
                serde_json::to_string(&summary.daily_emotions)?,
                serde_json::to_string(&summary.emotion_percentages)?,
                serde_json::to_string(&summary.weekly_emotions)?,
                serde_json::to_string(&summary.diary_entries)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_summary(
        &self,
        user: &UserId,
        start_date: &str,
        end_date: &str,
    ) -> Result<Option<WeeklySummary>> {
        let summary = self
            .conn
            .query_row(
                "SELECT id, userid, content, startdate, enddate, daily_emotions,
                        emotion_percentages, weekly_emotions, diary_entries
                 FROM summaries
                 WHERE userid = ?1 AND startdate = ?2 AND enddate = ?3",
                params![user.0, start_date, end_date],
                row_to_summary,
            )
            .optional()?;
        Ok(summary)
    }

    pub fn list_summaries(&self, user: &UserId) -> Result<Vec<WeeklySummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, userid, content, startdate, enddate, daily_emotions,
                    emotion_percentages, weekly_emotions, diary_entries
             FROM summaries WHERE userid = ?1 ORDER BY startdate ASC",
        )?;
        let summaries = stmt
            .query_map(params![user.0], row_to_summary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    pub fn count_summaries(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM summaries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn row_to_diary(row: &Row) -> rusqlite::Result<DiaryEntry> {
    let emotions_json: String = row.get(4)?;
    let dialogue_json: String = row.get(10)?;
    let time_of_day: Option<String> = row.get(8)?;

    Ok(DiaryEntry {
        id: DiaryId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        timestamp: row.get(2)?,
        content: row.get(3)?,
        emotions: serde_json::from_str(&emotions_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        context: DiaryContext {
            activity: row.get(5)?,
            location: row.get(6)?,
            people: row.get(7)?,
            time_of_day: time_of_day.as_deref().and_then(TimeOfDay::parse),
        },
        reasons: row.get(9)?,
        dialogue: serde_json::from_str(&dialogue_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
        context_retention: row.get(11)?,
        emotion_retention: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn row_to_summary(row: &Row) -> rusqlite::Result<WeeklySummary> {
    let daily_json: String = row.get(5)?;
    let percentages_json: String = row.get(6)?;
    let weekly_json: String = row.get(7)?;
    let entries_json: String = row.get(8)?;

    Ok(WeeklySummary {
        id: SummaryId(row.get(0)?),
        user_id: UserId(row.get(1)?),
        content: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        daily_emotions: serde_json::from_str(&daily_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        emotion_percentages: serde_json::from_str(&percentages_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        weekly_emotions: serde_json::from_str(&weekly_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        diary_entries: serde_json::from_str(&entries_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?,
    })
}

/// Shared handle over the single SQLite connection; also the storage
/// collaborator handed to the dialogue machine.
#[derive(Clone)]
pub struct SharedDatabase {
    db: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Database> {
        self.db.lock().await
    }
}

#[async_trait]
impl DiaryStore for SharedDatabase {
    async fn get_entry(&self, user: &UserId, diary: &DiaryId) -> Result<Option<DiaryEntry>> {
        let db = self.db.lock().await;
        let entry = db.get_diary(diary)?;
        Ok(entry.filter(|e| &e.user_id == user))
    }

    async fn list_entries(&self, user: &UserId) -> Result<Vec<DiaryEntry>> {
        let db = self.db.lock().await;
        db.list_diaries(user)
    }
}

#[async_trait]
impl StatisticStore for SharedDatabase {
    async fn distinct_subcategories(
        &self,
        user: &UserId,
        category: StatCategory,
    ) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        db.distinct_subcategories(user, category)
    }

    async fn increment(
        &self,
        user: &UserId,
        category: StatCategory,
        subcategory: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.increment_statistic(user, category, subcategory)
    }
}
