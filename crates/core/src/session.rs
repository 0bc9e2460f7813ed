use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::{EngineConfig, RetryPolicy};
use crate::corpus::Corpus;
use crate::embeddings::Embedder;
use crate::error::SessionError;
use crate::models::{TaskDirective, Turn};
use crate::prompt::PromptAssembler;
use crate::providers::{generate_with_retry, GenerationProvider, ProviderKind};
use crate::retrieve::Retriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Created,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Corpus reference plus the provider chosen at binding time. Set exactly
/// once; the session state machine rejects any later change.
struct SessionBinding {
    corpus: Arc<Corpus>,
    provider: Arc<dyn GenerationProvider>,
}

struct Session {
    id: String,
    state: SessionState,
    binding: Option<SessionBinding>,
    history: Vec<Turn>,
}

/// What a successful turn hands back to the caller.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub context_chunk_ids: Vec<String>,
    pub grounded: bool,
}

/// Owns every conversation: corpus binding, provider choice, and ordered
/// history, with turns processed strictly sequentially per session.
///
/// The registry is the only process-wide mutable state. Each session sits
/// behind its own async mutex, so concurrent sessions proceed independently
/// while two turns on the same session serialize. External calls (embedding,
/// generation) are the only suspension points and each runs under its own
/// deadline, so a hung backend fails the turn instead of wedging the
/// process. A failed or abandoned turn appends nothing to history.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    retriever: Retriever,
    assembler: PromptAssembler,
    retry: RetryPolicy,
    retrieval_k: usize,
    stage_timeout: Duration,
}

impl SessionManager {
    pub fn new(embedder: Arc<dyn Embedder>, config: &EngineConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            retriever: Retriever::new(embedder),
            assembler: PromptAssembler::new(config.max_context_tokens, config.history_window),
            retry: RetryPolicy {
                max_attempts: config.max_retries.max(1),
                ..RetryPolicy::default()
            },
            retrieval_k: config.retrieval_k,
            stage_timeout: config.request_timeout(),
        }
    }

    pub fn create_session(&self, id: impl Into<String>) -> Result<(), SessionError> {
        let id = id.into();
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(&id) {
            return Err(SessionError::Duplicate(id));
        }
        sessions.insert(
            id.clone(),
            Arc::new(Mutex::new(Session {
                id,
                state: SessionState::Created,
                binding: None,
                history: Vec::new(),
            })),
        );
        Ok(())
    }

    /// First successful corpus+provider binding moves the session from
    /// `created` to `active`. Binding an active (or closed) session is a
    /// protocol violation: the documented "no provider switch mid-chat"
    /// restriction, enforced structurally.
    pub async fn bind(
        &self,
        id: &str,
        corpus: Arc<Corpus>,
        provider: Arc<dyn GenerationProvider>,
    ) -> Result<(), SessionError> {
        let cell = self.get(id)?;
        let mut session = cell.lock().await;
        if session.state != SessionState::Created {
            return Err(SessionError::InvalidState {
                id: session.id.clone(),
                state: session.state,
                operation: "bind corpus and provider",
            });
        }
        session.binding = Some(SessionBinding { corpus, provider });
        session.state = SessionState::Active;
        Ok(())
    }

    /// One conversational turn: retrieve, assemble, generate, then append
    /// the user and assistant turns. History is only touched after the
    /// generated reply is in hand, so a timeout, retry exhaustion, or
    /// cancellation leaves the conversation exactly as it was.
    pub async fn take_turn(
        &self,
        id: &str,
        directive: TaskDirective,
        student_input: &str,
    ) -> Result<TurnOutcome, SessionError> {
        let cell = self.get(id)?;
        let mut session = cell.lock().await;

        let (corpus, provider) = match (&session.state, &session.binding) {
            (SessionState::Active, Some(binding)) => {
                (binding.corpus.clone(), binding.provider.clone())
            }
            _ => {
                return Err(SessionError::InvalidState {
                    id: session.id.clone(),
                    state: session.state,
                    operation: "take a turn",
                })
            }
        };

        let retrieved = timeout(
            self.stage_timeout,
            self.retriever
                .retrieve(student_input, &corpus, self.retrieval_k),
        )
        .await
        .map_err(|_| SessionError::StageTimeout {
            stage: "retrieval",
            limit_secs: self.stage_timeout.as_secs(),
        })??;

        let prompt = self
            .assembler
            .assemble(directive, student_input, &retrieved, &session.history);

        // the generation deadline covers the whole retry schedule; clamp
        // rather than overflow on an extreme retry budget
        let generation_limit = self
            .stage_timeout
            .checked_mul(self.retry.max_attempts)
            .unwrap_or(Duration::MAX);
        let reply = timeout(
            generation_limit,
            generate_with_retry(provider.as_ref(), &prompt, &self.retry),
        )
        .await
        .map_err(|_| SessionError::StageTimeout {
            stage: "generation",
            limit_secs: generation_limit.as_secs(),
        })??;

        session.history.push(Turn::user(student_input));
        session
            .history
            .push(Turn::assistant(reply.clone(), prompt.context_chunk_ids.clone()));

        Ok(TurnOutcome {
            reply,
            context_chunk_ids: prompt.context_chunk_ids,
            grounded: prompt.grounded,
        })
    }

    /// Explicit close; there is no way back to `created` or `active`.
    pub async fn close(&self, id: &str) -> Result<(), SessionError> {
        let cell = self.get(id)?;
        let mut session = cell.lock().await;
        if session.state == SessionState::Closed {
            return Err(SessionError::InvalidState {
                id: session.id.clone(),
                state: session.state,
                operation: "close",
            });
        }
        session.state = SessionState::Closed;
        Ok(())
    }

    pub async fn state(&self, id: &str) -> Result<SessionState, SessionError> {
        Ok(self.get(id)?.lock().await.state)
    }

    pub async fn history(&self, id: &str) -> Result<Vec<Turn>, SessionError> {
        Ok(self.get(id)?.lock().await.history.clone())
    }

    pub async fn provider_kind(&self, id: &str) -> Result<Option<ProviderKind>, SessionError> {
        let cell = self.get(id)?;
        let session = cell.lock().await;
        Ok(session.binding.as_ref().map(|b| b.provider.kind()))
    }

    fn get(&self, id: &str) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::Unknown(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::HashedNgramEmbedder;
    use crate::error::ProviderError;
    use crate::index::Similarity;
    use crate::ingest::IngestionPipeline;
    use crate::models::{Difficulty, Document, Role};
    use crate::prompt::AssembledPrompt;
    use async_trait::async_trait;

    struct ScriptedProvider {
        kind: ProviderKind,
        reply: String,
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn generate(&self, _prompt: &AssembledPrompt) -> Result<String, ProviderError> {
            Ok(self.reply.clone())
        }
    }

    struct UnreachableProvider;

    #[async_trait]
    impl GenerationProvider for UnreachableProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Remote
        }

        async fn generate(&self, _prompt: &AssembledPrompt) -> Result<String, ProviderError> {
            Err(ProviderError::Unavailable {
                provider: "remote".to_string(),
                details: "network unreachable".to_string(),
            })
        }
    }

    fn tutor(reply: &str) -> Arc<dyn GenerationProvider> {
        Arc::new(ScriptedProvider {
            kind: ProviderKind::Local,
            reply: reply.to_string(),
        })
    }

    fn quick_config() -> EngineConfig {
        EngineConfig {
            request_timeout_secs: 5,
            ..Default::default()
        }
    }

    async fn seeded_corpus(embedder: &Arc<HashedNgramEmbedder>) -> Arc<Corpus> {
        let corpus = Arc::new(Corpus::new(
            "biology",
            embedder.model_id(),
            embedder.dimensions(),
            Similarity::Cosine,
        ));
        let pipeline = IngestionPipeline::new(
            embedder.clone() as Arc<dyn Embedder>,
            ChunkingConfig::new(80, 10).unwrap(),
        );
        let document = Document::new(
            "doc-biology",
            "biology.txt",
            "Photosynthesis converts light into chemical energy.\n\n\
             Respiration releases that energy inside the mitochondria.\n\n\
             Osmosis moves water across a selectively permeable membrane.",
        );
        pipeline.ingest(&document, &corpus).await.unwrap();
        corpus
    }

    #[tokio::test]
    async fn binding_activates_and_turns_append_history() {
        let embedder = Arc::new(HashedNgramEmbedder::new(8));
        let manager = SessionManager::new(embedder.clone(), &quick_config());
        let corpus = seeded_corpus(&embedder).await;

        manager.create_session("s1").unwrap();
        assert_eq!(manager.state("s1").await.unwrap(), SessionState::Created);

        manager
            .bind("s1", corpus, tutor("Water follows the solutes."))
            .await
            .unwrap();
        assert_eq!(manager.state("s1").await.unwrap(), SessionState::Active);

        let outcome = manager
            .take_turn("s1", TaskDirective::Explain, "How does osmosis work?")
            .await
            .unwrap();
        assert_eq!(outcome.reply, "Water follows the solutes.");
        assert!(outcome.grounded);
        assert!(!outcome.context_chunk_ids.is_empty());

        let history = manager.history("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].context_chunk_ids, outcome.context_chunk_ids);
    }

    #[tokio::test]
    async fn provider_cannot_change_once_active() {
        let embedder = Arc::new(HashedNgramEmbedder::new(8));
        let manager = SessionManager::new(embedder.clone(), &quick_config());
        let corpus = seeded_corpus(&embedder).await;

        manager.create_session("s1").unwrap();
        manager
            .bind("s1", corpus.clone(), tutor("first answer"))
            .await
            .unwrap();
        manager
            .take_turn("s1", TaskDirective::Explain, "What is respiration?")
            .await
            .unwrap();

        let error = manager
            .bind("s1", corpus, Arc::new(UnreachableProvider))
            .await
            .unwrap_err();
        assert!(matches!(error, SessionError::InvalidState { .. }));

        // provider and history survived the rejected switch
        assert_eq!(
            manager.provider_kind("s1").await.unwrap(),
            Some(ProviderKind::Local)
        );
        assert_eq!(manager.history("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_generation_leaves_history_untouched_and_session_active() {
        let embedder = Arc::new(HashedNgramEmbedder::new(8));
        let mut config = quick_config();
        config.max_retries = 2;
        let manager = SessionManager::new(embedder.clone(), &config);
        let corpus = seeded_corpus(&embedder).await;

        manager.create_session("s1").unwrap();
        manager
            .bind("s1", corpus, Arc::new(UnreachableProvider))
            .await
            .unwrap();

        let error = manager
            .take_turn("s1", TaskDirective::Explain, "What is osmosis?")
            .await
            .unwrap_err();
        assert!(matches!(error, SessionError::Generation(_)));
        assert!(manager.history("s1").await.unwrap().is_empty());
        assert_eq!(manager.state("s1").await.unwrap(), SessionState::Active);
    }

    struct HangingProvider;

    #[async_trait]
    impl GenerationProvider for HangingProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Local
        }

        async fn generate(&self, _prompt: &AssembledPrompt) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_times_out_without_touching_history() {
        let embedder = Arc::new(HashedNgramEmbedder::new(8));
        let config = EngineConfig {
            request_timeout_secs: 1,
            max_retries: 1,
            ..Default::default()
        };
        let manager = SessionManager::new(embedder.clone(), &config);
        let corpus = seeded_corpus(&embedder).await;

        manager.create_session("s1").unwrap();
        manager
            .bind("s1", corpus, Arc::new(HangingProvider))
            .await
            .unwrap();

        let error = manager
            .take_turn("s1", TaskDirective::Explain, "What is osmosis?")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            SessionError::StageTimeout {
                stage: "generation",
                ..
            }
        ));

        // the abandoned turn left no trace and the session is still usable
        assert!(manager.history("s1").await.unwrap().is_empty());
        assert_eq!(manager.state("s1").await.unwrap(), SessionState::Active);
    }

    #[tokio::test]
    async fn extreme_retry_budget_clamps_the_generation_deadline() {
        let embedder = Arc::new(HashedNgramEmbedder::new(8));
        let config = EngineConfig {
            request_timeout_secs: u64::MAX / 2,
            max_retries: u32::MAX,
            ..Default::default()
        };
        let manager = SessionManager::new(embedder.clone(), &config);
        let corpus = seeded_corpus(&embedder).await;

        manager.create_session("s1").unwrap();
        manager
            .bind("s1", corpus, tutor("Osmosis needs no energy input."))
            .await
            .unwrap();

        let outcome = manager
            .take_turn("s1", TaskDirective::Explain, "Does osmosis use ATP?")
            .await
            .unwrap();
        assert_eq!(outcome.reply, "Osmosis needs no energy input.");
    }

    #[tokio::test]
    async fn lifecycle_violations_are_rejected() {
        let embedder = Arc::new(HashedNgramEmbedder::new(8));
        let manager = SessionManager::new(embedder.clone(), &quick_config());
        let corpus = seeded_corpus(&embedder).await;

        assert!(matches!(
            manager.state("ghost").await,
            Err(SessionError::Unknown(_))
        ));

        manager.create_session("s1").unwrap();
        assert!(matches!(
            manager.create_session("s1"),
            Err(SessionError::Duplicate(_))
        ));

        // a created-but-unbound session cannot take turns
        let error = manager
            .take_turn("s1", TaskDirective::Explain, "hello?")
            .await
            .unwrap_err();
        assert!(matches!(error, SessionError::InvalidState { .. }));

        manager.bind("s1", corpus, tutor("hi")).await.unwrap();
        manager.close("s1").await.unwrap();
        assert_eq!(manager.state("s1").await.unwrap(), SessionState::Closed);

        let error = manager
            .take_turn("s1", TaskDirective::Explain, "still there?")
            .await
            .unwrap_err();
        assert!(matches!(error, SessionError::InvalidState { .. }));
        assert!(matches!(
            manager.close("s1").await,
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn quiz_turns_flow_through_the_same_pipeline() {
        let embedder = Arc::new(HashedNgramEmbedder::new(8));
        let manager = SessionManager::new(embedder.clone(), &quick_config());
        let corpus = seeded_corpus(&embedder).await;

        manager.create_session("s1").unwrap();
        manager
            .bind("s1", corpus, tutor("1. What does osmosis move?"))
            .await
            .unwrap();

        let outcome = manager
            .take_turn(
                "s1",
                TaskDirective::GenerateQuestions {
                    difficulty: Difficulty::Medium,
                },
                "osmosis",
            )
            .await
            .unwrap();
        assert!(outcome.grounded);
    }

    /// End to end over a 3-chunk corpus at dimension 8: querying with chunk
    /// 2's own text must rank chunk 2 first, and a context budget smaller
    /// than two chunks must keep only chunk 2.
    #[tokio::test]
    async fn retrieval_and_budgeting_prefer_the_nearest_chunk() {
        let embedder = Arc::new(HashedNgramEmbedder::new(8));
        let corpus = seeded_corpus(&embedder).await;
        assert_eq!(corpus.size(), 3);

        let retriever = Retriever::new(embedder.clone() as Arc<dyn Embedder>);
        let query = "Respiration releases that energy inside the mitochondria.";
        let hits = retriever.retrieve(query, &corpus, 2).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert!(hits[0].chunk.text.contains("Respiration"));
        assert!(hits[0].score >= hits[1].score);

        // budget below the two retrieved chunks combined: only the best stays
        let combined = crate::prompt::estimate_tokens(&hits[0].chunk.text)
            + crate::prompt::estimate_tokens(&hits[1].chunk.text);
        let assembler = PromptAssembler::new(combined - 1, 8);
        let prompt = assembler.assemble(TaskDirective::Explain, query, &hits, &[]);
        assert_eq!(prompt.context_chunk_ids, vec![hits[0].chunk.chunk_id.clone()]);
        assert!(prompt.text.contains("Respiration"));
    }
}
