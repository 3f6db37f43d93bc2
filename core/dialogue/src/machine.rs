use emodiary_schemas::{
    ChatTurnRequest, ChatTurnResponse, DiaryContext, EmotionTaxonomy, Phase, StatCategory,
};
use emodiary_retrieval::{retrieve_by_context, retrieve_by_emotion, RetrievalConfig};
use tracing::{info, warn};

use crate::classifier::{classify_context, record_context, record_emotions};
use crate::llm::LanguageModel;
use crate::phases::{
    check_explore_criteria, check_satisfaction, transition, user_turn_count, CriteriaSignal,
    Verdict, EXPLORE_TURN_CEILING,
};
use crate::responder;
use crate::store::{DiaryStore, StatisticStore};

/// Turn-level failures that abort the request. Anything recoverable is
/// reported in-band through [`ChatTurnResponse::error`] instead.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("language model unavailable: {0}")]
    ModelUnavailable(#[source] anyhow::Error),
    #[error("unknown phase tag: {0}")]
    UnknownPhase(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("storage error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Durable side effects of a completed turn, applied by the caller after the
/// response is composed. The machine itself never writes diary rows.
#[derive(Debug, Clone, Default)]
pub struct TurnEffects {
    pub context: Option<DiaryContext>,
    pub emotions: Option<Vec<String>>,
    pub reasons: Option<String>,
}

/// Drives one dialogue turn through the phase graph:
/// explore -> detect -> reflect -> (revise)* -> goodbye.
///
/// The machine is stateless between turns; the client carries the phase
/// cursor and the accepted emotion set in each request.
pub struct DialogueMachine {
    taxonomy: EmotionTaxonomy,
    retrieval: RetrievalConfig,
}

impl DialogueMachine {
    pub fn new(taxonomy: EmotionTaxonomy, retrieval: RetrievalConfig) -> Self {
        Self { taxonomy, retrieval }
    }

    pub fn taxonomy(&self) -> &EmotionTaxonomy {
        &self.taxonomy
    }

    pub async fn take_turn(
        &self,
        llm: &dyn LanguageModel,
        diaries: &dyn DiaryStore,
        stats: &dyn StatisticStore,
        request: &ChatTurnRequest,
    ) -> Result<(ChatTurnResponse, TurnEffects), TurnError> {
        let phase = Phase::parse(&request.phase)
            .ok_or_else(|| TurnError::UnknownPhase(request.phase.clone()))?;

        if request.diary.trim().is_empty() {
            return Err(TurnError::MissingField("diary"));
        }

        info!(
            "Turn for {} diary {} in phase {}",
            request.user_id,
            request.diary_id,
            phase.as_str()
        );

        match phase {
            Phase::Explore => self.explore_turn(llm, diaries, stats, request).await,
            Phase::Detect => self.detect_turn(llm, diaries, request).await,
            Phase::Reflect | Phase::Revise => {
                self.feedback_turn(llm, diaries, stats, request, phase).await
            }
            Phase::Goodbye => Ok((
                ChatTurnResponse {
                    phase: Phase::Goodbye,
                    content: String::new(),
                    emotions: None,
                    rationale: None,
                    error: Some("conversation already ended".to_string()),
                },
                TurnEffects::default(),
            )),
        }
    }

    async fn explore_turn(
        &self,
        llm: &dyn LanguageModel,
        diaries: &dyn DiaryStore,
        stats: &dyn StatisticStore,
        request: &ChatTurnRequest,
    ) -> Result<(ChatTurnResponse, TurnEffects), TurnError> {
        let verdict = check_explore_criteria(llm, &request.diary, &request.dialogue)
            .await
            .map_err(TurnError::ModelUnavailable)?;

        let summary = match verdict {
            Verdict::Ok(summary) => summary,
            Verdict::Malformed => {
                // Analysis came back unusable; keep the conversation moving.
                let content = responder::ask_missing_info(
                    llm,
                    &request.diary,
                    &request.dialogue,
                    "more about what happened",
                )
                .await
                .map_err(TurnError::ModelUnavailable)?;
                return Ok((
                    soft_failure(Phase::Explore, content, "criteria check failed"),
                    TurnEffects::default(),
                ));
            }
        };

        let ceiling_hit = user_turn_count(&request.dialogue) >= EXPLORE_TURN_CEILING;
        let done = summary.skip || summary.is_complete() || ceiling_hit;
        if !done {
            let missing = summary
                .most_important_missing()
                .unwrap_or("more about what happened");
            let content =
                responder::ask_missing_info(llm, &request.diary, &request.dialogue, missing)
                    .await
                    .map_err(TurnError::ModelUnavailable)?;
            return Ok((
                ChatTurnResponse {
                    phase: transition(Phase::Explore, CriteriaSignal::KeepExploring),
                    content,
                    emotions: None,
                    rationale: summary.rationale,
                    error: None,
                },
                TurnEffects::default(),
            ));
        }

        // Enough detail gathered (or the user opted out): classify context,
        // then run the detection work in the same turn.
        let classified = classify_context(
            llm,
            stats,
            Some(&request.user_id),
            &request.diary,
            &request.dialogue,
        )
        .await;
        record_context(stats, &request.user_id, &classified.context).await;

        let entries = diaries
            .list_entries(&request.user_id)
            .await
            .map_err(TurnError::Store)?;
        let similar = retrieve_by_context(
            &entries,
            Some(&request.diary_id),
            &classified.context,
            &self.retrieval,
        );

        let allowed = self.effective_labels(stats, request).await;
        let verdict = responder::infer_emotions(
            llm,
            &request.diary,
            &request.dialogue,
            &similar,
            &allowed,
        )
        .await
        .map_err(TurnError::ModelUnavailable)?;

        let assessment = match verdict {
            Verdict::Ok(assessment) if !assessment.emotions.is_empty() => assessment,
            _ => {
                warn!("Emotion inference unusable; staying in explore");
                let content = responder::ask_missing_info(
                    llm,
                    &request.diary,
                    &request.dialogue,
                    "how the experience felt",
                )
                .await
                .map_err(TurnError::ModelUnavailable)?;
                return Ok((
                    soft_failure(Phase::Explore, content, "emotion inference failed"),
                    TurnEffects {
                        context: Some(classified.context),
                        ..TurnEffects::default()
                    },
                ));
            }
        };

        record_emotions(stats, &request.user_id, &assessment.emotions).await;

        let content = responder::present_emotions(
            llm,
            &request.diary,
            &request.dialogue,
            &assessment.emotions,
            assessment.rationale.as_deref(),
        )
        .await
        .map_err(TurnError::ModelUnavailable)?;

        Ok((
            ChatTurnResponse {
                phase: transition(Phase::Explore, CriteriaSignal::ExploreDone),
                content,
                emotions: Some(assessment.emotions.clone()),
                rationale: assessment.rationale,
                error: None,
            },
            TurnEffects {
                context: Some(classified.context),
                emotions: Some(assessment.emotions),
                reasons: None,
            },
        ))
    }

    /// The user has replied to the presented emotions; reflect their
    /// experience against their own history and solicit feedback.
    async fn detect_turn(
        &self,
        llm: &dyn LanguageModel,
        diaries: &dyn DiaryStore,
        request: &ChatTurnRequest,
    ) -> Result<(ChatTurnResponse, TurnEffects), TurnError> {
        let emotions = request
            .emotions
            .as_deref()
            .ok_or(TurnError::MissingField("emotions"))?;

        let entries = diaries
            .list_entries(&request.user_id)
            .await
            .map_err(TurnError::Store)?;
        let context = diaries
            .get_entry(&request.user_id, &request.diary_id)
            .await
            .map_err(TurnError::Store)?
            .map(|entry| entry.context)
            .unwrap_or_default();

        let by_context = retrieve_by_context(
            &entries,
            Some(&request.diary_id),
            &context,
            &self.retrieval,
        );
        let by_emotion = retrieve_by_emotion(
            &entries,
            Some(&request.diary_id),
            emotions,
            &self.taxonomy,
            &self.retrieval,
        );

        let reflection = responder::generate_reflection(
            llm,
            &request.diary,
            &request.dialogue,
            &by_context,
            &by_emotion,
        )
        .await
        .map_err(TurnError::ModelUnavailable)?;

        let solicitation =
            responder::encourage_feedback(llm, &request.diary, &request.dialogue)
                .await
                .map_err(TurnError::ModelUnavailable)?;

        let content = match reflection {
            Some(reflection) => format!("{reflection}\n\n{solicitation}"),
            None => solicitation,
        };

        Ok((
            ChatTurnResponse {
                phase: transition(Phase::Detect, CriteriaSignal::Inconclusive),
                content,
                emotions: None,
                rationale: None,
                error: None,
            },
            TurnEffects::default(),
        ))
    }

    /// Reflect and revise share a handler: judge the user's reaction, then
    /// either close out or re-run inference without the rejected labels.
    async fn feedback_turn(
        &self,
        llm: &dyn LanguageModel,
        diaries: &dyn DiaryStore,
        stats: &dyn StatisticStore,
        request: &ChatTurnRequest,
        phase: Phase,
    ) -> Result<(ChatTurnResponse, TurnEffects), TurnError> {
        let current_emotions = request
            .emotions
            .as_deref()
            .ok_or(TurnError::MissingField("emotions"))?;

        let verdict = check_satisfaction(llm, &request.diary, &request.dialogue)
            .await
            .map_err(TurnError::ModelUnavailable)?;

        let satisfaction = match verdict {
            Verdict::Ok(satisfaction) => satisfaction,
            Verdict::Malformed => {
                let content =
                    responder::encourage_feedback(llm, &request.diary, &request.dialogue)
                        .await
                        .map_err(TurnError::ModelUnavailable)?;
                return Ok((
                    soft_failure(
                        transition(phase, CriteriaSignal::Inconclusive),
                        content,
                        "satisfaction check failed",
                    ),
                    TurnEffects::default(),
                ));
            }
        };

        if satisfaction.satisfied {
            let content = responder::goodbye_message(llm, &request.diary, &request.dialogue)
                .await
                .map_err(TurnError::ModelUnavailable)?;
            return Ok((
                ChatTurnResponse {
                    phase: transition(phase, CriteriaSignal::Satisfied),
                    content,
                    emotions: Some(current_emotions.to_vec()),
                    rationale: satisfaction.rationale.clone(),
                    error: None,
                },
                TurnEffects {
                    context: None,
                    emotions: None,
                    reasons: satisfaction.rationale,
                },
            ));
        }

        // Rejected: infer again, excluding everything the user turned down.
        let entries = diaries
            .list_entries(&request.user_id)
            .await
            .map_err(TurnError::Store)?;
        let context = diaries
            .get_entry(&request.user_id, &request.diary_id)
            .await
            .map_err(TurnError::Store)?
            .map(|entry| entry.context)
            .unwrap_or_default();
        let similar = retrieve_by_context(
            &entries,
            Some(&request.diary_id),
            &context,
            &self.retrieval,
        );

        let allowed = self.effective_labels(stats, request).await;
        let verdict = responder::revise_emotions(
            llm,
            &request.diary,
            &request.dialogue,
            &similar,
            &allowed,
            current_emotions,
        )
        .await
        .map_err(TurnError::ModelUnavailable)?;

        let next = transition(phase, CriteriaSignal::Unsatisfied);
        let assessment = match verdict {
            Verdict::Ok(assessment) if !assessment.emotions.is_empty() => assessment,
            _ => {
                warn!("Revision produced no usable emotions");
                let content =
                    responder::encourage_feedback(llm, &request.diary, &request.dialogue)
                        .await
                        .map_err(TurnError::ModelUnavailable)?;
                return Ok((
                    soft_failure(next, content, "emotion revision failed"),
                    TurnEffects::default(),
                ));
            }
        };

        record_emotions(stats, &request.user_id, &assessment.emotions).await;

        let content = responder::present_emotions(
            llm,
            &request.diary,
            &request.dialogue,
            &assessment.emotions,
            assessment.rationale.as_deref(),
        )
        .await
        .map_err(TurnError::ModelUnavailable)?;

        Ok((
            ChatTurnResponse {
                phase: next,
                content,
                emotions: Some(assessment.emotions.clone()),
                rationale: assessment.rationale,
                error: None,
            },
            TurnEffects {
                context: None,
                emotions: Some(assessment.emotions),
                reasons: None,
            },
        ))
    }

    /// The taxonomy's labels plus every emotion this user has logged before,
    /// so personal vocabulary survives taxonomy swaps.
    async fn effective_labels(
        &self,
        stats: &dyn StatisticStore,
        request: &ChatTurnRequest,
    ) -> Vec<String> {
        match stats
            .distinct_subcategories(&request.user_id, StatCategory::Emotion)
            .await
        {
            Ok(seen) => self.taxonomy.effective_labels(&seen),
            Err(err) => {
                warn!("Failed to load emotion history for {}: {}", request.user_id, err);
                self.taxonomy.labels().to_vec()
            }
        }
    }
}

fn soft_failure(phase: Phase, content: String, reason: &str) -> ChatTurnResponse {
    ChatTurnResponse {
        phase,
        content,
        emotions: None,
        rationale: None,
        error: Some(reason.to_string()),
    }
}
