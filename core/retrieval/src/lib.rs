pub mod engine;
pub mod retention;
pub mod similarity;

pub use engine::{retrieve_by_context, retrieve_by_emotion, RetrievalConfig, RetrievedEntry};
pub use retention::{compute_retention, retention_score, RetentionUpdate};
pub use similarity::{context_similarity, emotion_similarity, min_max_scale, ContextWeights};
