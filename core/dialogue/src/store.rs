use anyhow::Result;
use async_trait::async_trait;
use emodiary_schemas::{DiaryEntry, DiaryId, StatCategory, UserId};

/// Diary storage collaborator, as seen by the dialogue machine.
#[async_trait]
pub trait DiaryStore: Send + Sync {
    async fn get_entry(&self, user: &UserId, diary: &DiaryId) -> Result<Option<DiaryEntry>>;

    /// All of a user's entries; callers handle self-exclusion.
    async fn list_entries(&self, user: &UserId) -> Result<Vec<DiaryEntry>>;
}

/// Statistic storage collaborator: increment-only counters keyed by
/// (user, category, subcategory).
#[async_trait]
pub trait StatisticStore: Send + Sync {
    async fn distinct_subcategories(
        &self,
        user: &UserId,
        category: StatCategory,
    ) -> Result<Vec<String>>;

    async fn increment(
        &self,
        user: &UserId,
        category: StatCategory,
        subcategory: &str,
    ) -> Result<()>;
}
