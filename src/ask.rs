//! Conversation orchestration.
//!
//! One question moves through RECEIVED → GROUNDING → PROMPTING → STREAMING
//! and ends in COMPLETED or FAILED. Fragments are forwarded to the caller
//! the moment they arrive; the full response accumulates alongside and is
//! persisted exactly once after the stream drains — on success, on provider
//! failure (as a fixed in-band error string), and best-effort when the
//! caller disconnects mid-stream.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::generate::Generator;
use crate::models::ChatMessage;
use crate::search::Retriever;
use crate::store::HistoryStore;

/// Persona preamble used as the system message on every request.
pub const SYSTEM_PREAMBLE: &str = "\
You are Grimoire, a considerate assistant who replies warmly and politely. \
You answer only from what you know, and when a question goes beyond your \
knowledge you say so kindly. You do not always need the retrieved context: \
when someone talks to you naturally, answer naturally. Format every answer \
in clear, well-organized markdown. Your main goal is to help users through \
your knowledge source.";

/// Header introducing retrieved context inside the system message.
pub const KNOWLEDGE_HEADER: &str = "Knowledge:";

/// In-band replacement answer when generation fails. The failed exchange
/// is still persisted with this text.
pub const ANSWER_ERROR_TEXT: &str = "An error occurred while generating the answer.";

/// A streaming answer. Fragments arrive on `tokens` in generation order;
/// `filenames` is the side-channel provenance metadata, known before the
/// first token. `completion` resolves once the post-drain persistence has
/// run.
#[derive(Debug)]
pub struct Answer {
    pub discussion_id: String,
    pub filenames: BTreeSet<String>,
    pub tokens: mpsc::Receiver<String>,
    pub completion: tokio::task::JoinHandle<()>,
}

pub struct Orchestrator {
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    store: Arc<HistoryStore>,
}

impl Orchestrator {
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn Generator>,
        store: Arc<HistoryStore>,
    ) -> Self {
        Self {
            retriever,
            generator,
            store,
        }
    }

    /// Answer one question, grounding it on the index and appending the
    /// exchange to the given discussion (a new one when `None`).
    ///
    /// `prior_messages` is caller-supplied rolling history; only `user`
    /// and `assistant` turns are kept, anything else is dropped.
    pub async fn ask(
        &self,
        question: &str,
        discussion_id: Option<String>,
        prior_messages: Vec<ChatMessage>,
    ) -> Result<Answer> {
        // RECEIVED
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question must not be empty".to_string()));
        }

        // GROUNDING
        tracing::debug!(%question, "grounding");
        let retrieval = self.retriever.retrieve(question).await?;

        let system = if retrieval.is_empty() {
            SYSTEM_PREAMBLE.to_string()
        } else {
            format!("{}\n\n{}\n{}", SYSTEM_PREAMBLE, KNOWLEDGE_HEADER, retrieval.context)
        };

        // PROMPTING
        let mut messages = Vec::with_capacity(prior_messages.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(
            prior_messages
                .into_iter()
                .filter(|m| m.role == "user" || m.role == "assistant"),
        );
        messages.push(ChatMessage::user(question));

        let discussion_id = discussion_id.unwrap_or_else(|| self.store.new_discussion_id());

        // The question must survive even if generation fails.
        if let Err(e) = self
            .store
            .append_message(&discussion_id, ChatMessage::user(question))
            .await
        {
            tracing::warn!(%discussion_id, error = %e, "failed to persist user turn");
        }

        // STREAMING
        let (tx, rx) = mpsc::channel::<String>(32);
        let generator = self.generator.clone();
        let store = self.store.clone();
        let handle = discussion_id.clone();
        let question_owned = question.to_string();
        let context = retrieval.context.clone();

        let completion = tokio::spawn(async move {
            let mut full_response = String::new();
            let mut failed = false;

            match generator.stream_chat(messages).await {
                Ok(mut tokens) => {
                    while let Some(item) = tokens.recv().await {
                        match item {
                            Ok(fragment) => {
                                full_response.push_str(&fragment);
                                if tx.send(fragment).await.is_err() {
                                    // Caller went away: stop forwarding and
                                    // keep what we have.
                                    tracing::info!(%handle, "client disconnected mid-stream");
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!(%handle, error = %e, "generation failed mid-stream");
                                failed = true;
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(%handle, error = %e, "generation failed to start");
                    failed = true;
                }
            }

            if failed {
                full_response = ANSWER_ERROR_TEXT.to_string();
                let _ = tx.send(ANSWER_ERROR_TEXT.to_string()).await;
            }

            // COMPLETED / FAILED — both persist, exactly once, after the
            // stream has fully drained.
            if let Err(e) = store
                .append_message(&handle, ChatMessage::assistant(&full_response))
                .await
            {
                tracing::warn!(%handle, error = %e, "failed to persist assistant turn");
            }
            if let Err(e) = store.record_exchange(&question_owned, &full_response, &context) {
                tracing::warn!(%handle, error = %e, "failed to record exchange");
            }
        });

        Ok(Answer {
            discussion_id,
            filenames: retrieval.filenames,
            tokens: rx,
            completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::Embedder;
    use crate::index::{MemoryIndex, VectorIndex, VectorPoint};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FlatEmbedder;

    #[async_trait]
    impl Embedder for FlatEmbedder {
        fn model_name(&self) -> &str {
            "flat-test"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Generator that replays a script and records the messages it was
    /// given.
    struct ScriptedGenerator {
        script: Vec<Result<String>>,
        seen_messages: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedGenerator {
        fn ok(fragments: &[&str]) -> Self {
            Self {
                script: fragments.iter().map(|f| Ok(f.to_string())).collect(),
                seen_messages: Mutex::new(Vec::new()),
            }
        }

        fn failing_after(fragments: &[&str]) -> Self {
            let mut script: Vec<Result<String>> =
                fragments.iter().map(|f| Ok(f.to_string())).collect();
            script.push(Err(Error::GenerationFailure("boom".to_string())));
            Self {
                script,
                seen_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<crate::generate::TokenReceiver> {
            *self.seen_messages.lock().unwrap() = messages;
            let (tx, rx) = mpsc::channel(8);
            let script: Vec<Result<String>> = self
                .script
                .iter()
                .map(|r| match r {
                    Ok(s) => Ok(s.clone()),
                    Err(e) => Err(Error::GenerationFailure(e.to_string())),
                })
                .collect();
            tokio::spawn(async move {
                for item in script {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: Arc<HistoryStore>,
        generator: Arc<ScriptedGenerator>,
        orchestrator: Orchestrator,
    }

    async fn fixture(generator: ScriptedGenerator, seed_index: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(HistoryStore::open(tmp.path()).unwrap());
        let index = Arc::new(MemoryIndex::new());
        if seed_index {
            let mut metadata = BTreeMap::new();
            metadata.insert("filename".to_string(), "sky.txt".to_string());
            index
                .upsert(vec![VectorPoint {
                    id: "sky.txt_0".to_string(),
                    vector: vec![1.0, 0.0],
                    text: "The sky is blue.".to_string(),
                    metadata,
                }])
                .await
                .unwrap();
        }
        let retriever = Arc::new(Retriever::new(
            RetrievalConfig {
                top_k: 5,
                distance_threshold: 1.0,
            },
            Arc::new(FlatEmbedder),
            index,
        ));
        let generator = Arc::new(generator);
        let orchestrator = Orchestrator::new(retriever, generator.clone(), store.clone());
        Fixture {
            _tmp: tmp,
            store,
            generator,
            orchestrator,
        }
    }

    async fn drain(answer: &mut Answer) -> String {
        let mut out = String::new();
        while let Some(fragment) = answer.tokens.recv().await {
            out.push_str(&fragment);
        }
        out
    }

    #[tokio::test]
    async fn test_empty_question_is_invalid_input() {
        let f = fixture(ScriptedGenerator::ok(&["hi"]), false).await;
        let err = f.orchestrator.ask("   ", None, Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_index_uses_persona_only_system_message() {
        let f = fixture(ScriptedGenerator::ok(&["Hello", " there"]), false).await;
        let mut answer = f
            .orchestrator
            .ask("What is up?", None, Vec::new())
            .await
            .unwrap();

        assert!(answer.filenames.is_empty());
        let text = drain(&mut answer).await;
        assert_eq!(text, "Hello there");

        let messages = f.generator.seen_messages.lock().unwrap().clone();
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, SYSTEM_PREAMBLE);
        assert!(!messages[0].content.contains(KNOWLEDGE_HEADER));
    }

    #[tokio::test]
    async fn test_grounded_question_gets_knowledge_section() {
        let f = fixture(ScriptedGenerator::ok(&["Because", " physics."]), true).await;
        let mut answer = f
            .orchestrator
            .ask("Why is the sky blue?", None, Vec::new())
            .await
            .unwrap();

        assert!(answer.filenames.contains("sky.txt"));
        drain(&mut answer).await;

        let messages = f.generator.seen_messages.lock().unwrap().clone();
        assert!(messages[0].content.starts_with(SYSTEM_PREAMBLE));
        assert!(messages[0].content.contains(KNOWLEDGE_HEADER));
        assert!(messages[0].content.contains("The sky is blue."));
    }

    #[tokio::test]
    async fn test_history_filtered_to_user_and_assistant() {
        let f = fixture(ScriptedGenerator::ok(&["ok"]), false).await;
        let prior = vec![
            ChatMessage::system("ignore me"),
            ChatMessage::user("earlier question"),
            ChatMessage {
                role: "tool".to_string(),
                content: "tool output".to_string(),
            },
            ChatMessage::assistant("earlier answer"),
        ];
        let mut answer = f
            .orchestrator
            .ask("next question", None, prior)
            .await
            .unwrap();
        drain(&mut answer).await;

        let messages = f.generator.seen_messages.lock().unwrap().clone();
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages.last().unwrap().content, "next question");
    }

    #[tokio::test]
    async fn test_transcript_has_user_then_assistant_in_order() {
        let f = fixture(ScriptedGenerator::ok(&["The", " answer."]), false).await;
        let mut answer = f
            .orchestrator
            .ask("A question", None, Vec::new())
            .await
            .unwrap();
        let id = answer.discussion_id.clone();
        drain(&mut answer).await;
        answer.completion.await.unwrap();

        let discussions = f.store.list_discussions(10).unwrap();
        assert_eq!(discussions.len(), 1);
        assert_eq!(discussions[0].id, id);
        let msgs = &discussions[0].messages;
        assert_eq!(msgs.len(), 2);
        assert_eq!((msgs[0].role.as_str(), msgs[0].content.as_str()), ("user", "A question"));
        assert_eq!((msgs[1].role.as_str(), msgs[1].content.as_str()), ("assistant", "The answer."));
    }

    #[tokio::test]
    async fn test_generation_failure_streams_and_persists_error_text() {
        let f = fixture(ScriptedGenerator::failing_after(&["partial "]), false).await;
        let mut answer = f
            .orchestrator
            .ask("Doomed question", None, Vec::new())
            .await
            .unwrap();
        let text = drain(&mut answer).await;
        answer.completion.await.unwrap();

        assert!(text.ends_with(ANSWER_ERROR_TEXT));

        let discussions = f.store.list_discussions(1).unwrap();
        assert_eq!(discussions.len(), 1);
        let assistant_turn = discussions[0].messages.last().unwrap();
        assert_eq!(assistant_turn.role, "assistant");
        assert_eq!(assistant_turn.content, ANSWER_ERROR_TEXT);
    }

    #[tokio::test]
    async fn test_client_disconnect_persists_partial_response() {
        let f = fixture(ScriptedGenerator::ok(&["one ", "two ", "three"]), false).await;
        let mut answer = f
            .orchestrator
            .ask("Q", None, Vec::new())
            .await
            .unwrap();

        // Take the first fragment, then hang up.
        let first = answer.tokens.recv().await.unwrap();
        assert_eq!(first, "one ");
        drop(answer.tokens);
        answer.completion.await.unwrap();

        let discussions = f.store.list_discussions(1).unwrap();
        let assistant_turn = discussions[0].messages.last().unwrap();
        assert_eq!(assistant_turn.role, "assistant");
        assert!(assistant_turn.content.starts_with("one "));
    }

    #[tokio::test]
    async fn test_existing_discussion_accumulates_turns() {
        let f = fixture(ScriptedGenerator::ok(&["second answer"]), false).await;
        let handle = f.store.new_discussion_id();
        f.store
            .append_message(&handle, ChatMessage::user("first question"))
            .await
            .unwrap();
        f.store
            .append_message(&handle, ChatMessage::assistant("first answer"))
            .await
            .unwrap();

        let mut answer = f
            .orchestrator
            .ask("second question", Some(handle.clone()), Vec::new())
            .await
            .unwrap();
        drain(&mut answer).await;
        answer.completion.await.unwrap();

        let discussions = f.store.list_discussions(10).unwrap();
        assert_eq!(discussions.len(), 1);
        assert_eq!(discussions[0].messages.len(), 4);
    }
}
