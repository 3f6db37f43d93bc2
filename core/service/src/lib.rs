pub mod consolidate;
pub mod database;
pub mod weekly;

pub use consolidate::consolidate_user;
pub use database::{Database, SharedDatabase};
pub use weekly::{backfill_summaries, generate_weekly_summary, last_completed_week, week_bounds};
