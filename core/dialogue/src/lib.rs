pub mod classifier;
pub mod llm;
pub mod machine;
pub mod parse;
pub mod phases;
pub mod responder;
pub mod store;

pub use llm::{ChatClient, LanguageModel, LlmConfig, LlmProvider};
pub use machine::{DialogueMachine, TurnEffects, TurnError};
pub use store::{DiaryStore, StatisticStore};
