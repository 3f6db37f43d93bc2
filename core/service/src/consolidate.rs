use anyhow::Result;
use chrono::{DateTime, Utc};
use emodiary_retrieval::{compute_retention, ContextWeights};
use emodiary_schemas::{EmotionTaxonomy, UserId};
use tracing::info;

use crate::database::Database;

/// Recompute both retention scores for every entry of one user and persist
/// them. Pure function of the current entry set and `now`, so running it
/// twice in a row is a no-op. Returns the number of entries updated.
pub fn consolidate_user(
    db: &Database,
    taxonomy: &EmotionTaxonomy,
    weights: &ContextWeights,
    user: &UserId,
    now: DateTime<Utc>,
) -> Result<usize> {
    let entries = db.list_diaries(user)?;
    if entries.is_empty() {
        return Ok(0);
    }

    let updates = compute_retention(&entries, taxonomy, weights, now);
    for update in &updates {
        db.set_retention(
            &update.diary_id,
            update.context_retention,
            update.emotion_retention,
        )?;
    }

    info!("Consolidated {} entries for {}", updates.len(), user);
    Ok(updates.len())
}
