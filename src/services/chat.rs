//! Chat generation and transcript persistence.
//!
//! A generation runs in its own task and feeds [`StreamEvent`]s to the HTTP
//! response through a bounded channel. When the receiver goes away (client
//! disconnect) the task drops the provider stream and saves nothing. The
//! transcript is saved only after a complete, non-empty reply.

use std::sync::Arc;

use futures::StreamExt;
use tama_llm::{ChatModel, CompletionRequest, SamplingConfig, TokenStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::db::{self, DbPool};
use crate::models::Message;
use crate::services::Clock;
use crate::{Error, Result};

/// Events buffered between the generation task and the response
const CHANNEL_CAPACITY: usize = 64;

/// What the caller sees of a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done { message_id: String },
    /// Generation failed after streaming began.
    Error,
}

#[derive(Clone)]
pub struct ChatService {
    db: DbPool,
    model: Arc<dyn ChatModel>,
    clock: Arc<dyn Clock>,
    system_prompt: String,
    sampling: SamplingConfig,
}

impl ChatService {
    pub fn new(
        db: DbPool,
        model: Arc<dyn ChatModel>,
        clock: Arc<dyn Clock>,
        system_prompt: String,
        sampling: SamplingConfig,
    ) -> Self {
        Self {
            db,
            model,
            clock,
            system_prompt,
            sampling,
        }
    }

    /// Build the provider request for a normalized history.
    pub fn completion_request(&self, history: &[Message]) -> Result<CompletionRequest> {
        let messages: Vec<_> = history.iter().filter_map(Message::to_chat_message).collect();
        if messages.is_empty() {
            return Err(Error::InvalidRequest(
                "No user or assistant messages to answer".to_string(),
            ));
        }

        Ok(CompletionRequest {
            system: self.system_prompt.clone(),
            messages,
            sampling: self.sampling,
        })
    }

    /// Open the provider stream and start pumping tokens.
    ///
    /// Failing to open the stream is returned as an error; anything that
    /// goes wrong later arrives as [`StreamEvent::Error`].
    pub async fn generate(
        &self,
        chat_id: String,
        user_id: String,
        history: Vec<Message>,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let request = self.completion_request(&history)?;
        let tokens = self.model.stream(request).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let service = self.clone();
        tokio::spawn(async move {
            service.pump(tokens, tx, chat_id, user_id, history).await;
        });

        Ok(rx)
    }

    async fn pump(
        &self,
        mut tokens: TokenStream,
        tx: mpsc::Sender<StreamEvent>,
        chat_id: String,
        user_id: String,
        mut history: Vec<Message>,
    ) {
        let mut reply = String::new();

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!(%chat_id, "Client disconnected, generation cancelled");
                    return;
                }
                next = tokens.next() => next,
            };

            match next {
                Some(Ok(token)) => {
                    reply.push_str(&token);
                    if tx.send(StreamEvent::Token(token)).await.is_err() {
                        debug!(%chat_id, "Client disconnected, generation cancelled");
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!(%chat_id, error = %e, "Generation failed mid-stream");
                    let _ = tx.send(StreamEvent::Error).await;
                    return;
                }
                None => break,
            }
        }

        if reply.trim().is_empty() {
            warn!(%chat_id, "Provider returned an empty reply");
            let _ = tx.send(StreamEvent::Error).await;
            return;
        }

        let message_id = nanoid::nanoid!();
        let now = self.clock.now();
        history.push(Message::assistant(message_id.clone(), reply, now));

        match db::save_chat(&self.db, &chat_id, &user_id, history, now).await {
            Ok(()) => info!(%chat_id, %user_id, "Chat saved"),
            Err(e) => error!(%chat_id, %user_id, error = %e, "Failed to save chat"),
        }

        let _ = tx.send(StreamEvent::Done { message_id }).await;
    }
}
