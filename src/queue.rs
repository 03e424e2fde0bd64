//! The submission registry and event demultiplexer.
//!
//! One long-lived event channel carries frames for every in-flight
//! submission. The registry maps `prompt_id` to a per-submission bounded
//! channel and translates each inbound frame into at most one outbound
//! [`PromptMessage`]. Channels are bounded at capacity 1, so a consumer
//! that stops draining stalls the reader and, transitively, every other
//! submission: consumers must read promptly.
//!
//! One registry lock guards both submission insertion and frame
//! dispatch, so a frame that races a just-submitted prompt sees either
//! no record (and is dropped) or the fully installed one.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex, MutexGuard};

use crate::graph::Graph;
use crate::messages::{
    parse_message, DataOutput, ExecutionFailure, PromptMessage, StopReason, WsMessage,
};

/// Capacity of each submission's message channel. Kept minimal so the
/// demultiplexer back-pressures slow consumers instead of buffering.
const SUBMISSION_CHANNEL_CAPACITY: usize = 1;

/// Callbacks fired from the demultiplexer as frames arrive. All are
/// optional and invoked inline on the reader task.
#[derive(Default)]
pub struct ClientCallbacks {
    /// The server's queue depth changed.
    pub queue_count_changed: Option<Box<dyn Fn(i64) + Send + Sync>>,
    /// A queued submission started executing.
    pub queued_item_started: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// A submission stopped (finished, interrupted, or failed).
    pub queued_item_stopped: Option<Box<dyn Fn(&str, StopReason) + Send + Sync>>,
    /// A node produced output data for a submission.
    pub queued_item_data_available:
        Option<Box<dyn Fn(&str, &HashMap<String, Vec<DataOutput>>) + Send + Sync>>,
}

impl std::fmt::Debug for ClientCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCallbacks")
            .field("queue_count_changed", &self.queue_count_changed.is_some())
            .field("queued_item_started", &self.queued_item_started.is_some())
            .field("queued_item_stopped", &self.queued_item_stopped.is_some())
            .field(
                "queued_item_data_available",
                &self.queued_item_data_available.is_some(),
            )
            .finish()
    }
}

/// A prompt accepted by the server, plus the channel its execution
/// messages arrive on. The final message is always
/// [`PromptMessage::Stopped`]; after it the channel yields nothing.
#[derive(Debug)]
pub struct Submission {
    pub prompt_id: String,
    pub number: i64,
    pub node_errors: serde_json::Value,
    pub(crate) messages: mpsc::Receiver<PromptMessage>,
}

impl Submission {
    /// Receive the next execution message, or `None` once the submission
    /// has stopped (or the event channel failed permanently).
    pub async fn recv(&mut self) -> Option<PromptMessage> {
        self.messages.recv().await
    }
}

pub(crate) struct InFlight {
    pub sender: mpsc::Sender<PromptMessage>,
    /// The originating workflow, for node-title resolution.
    pub workflow: Graph,
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    pub items: HashMap<String, InFlight>,
    /// Progress frames carry no prompt id; they are attributed to the
    /// most recently started submission.
    pub last_prompt: Option<String>,
    pub queue_depth: i64,
}

/// Shared map of in-flight submissions plus the frame-translation logic.
pub(crate) struct SubmissionRegistry {
    inner: Mutex<RegistryInner>,
    callbacks: ClientCallbacks,
}

impl SubmissionRegistry {
    pub fn new(callbacks: ClientCallbacks) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            callbacks,
        }
    }

    /// Lock the registry. Held by submit across the HTTP round-trip so
    /// frames cannot observe a half-installed record.
    pub async fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().await
    }

    pub fn new_submission_channel(
        &self,
    ) -> (mpsc::Sender<PromptMessage>, mpsc::Receiver<PromptMessage>) {
        mpsc::channel(SUBMISSION_CHANNEL_CAPACITY)
    }

    pub async fn queue_depth(&self) -> i64 {
        self.inner.lock().await.queue_depth
    }

    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn contains(&self, prompt_id: &str) -> bool {
        self.inner.lock().await.items.contains_key(prompt_id)
    }

    /// Drop every in-flight record. Consumers observe a closed channel.
    /// Called when the event channel fails permanently.
    pub async fn abort_all(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.items.is_empty() {
            tracing::warn!(
                count = inner.items.len(),
                "aborting in-flight submissions: event channel failed"
            );
        }
        inner.items.clear();
    }

    /// Translate one inbound frame. Unparseable frames are logged and
    /// dropped; they never terminate the reader or remove a submission.
    pub async fn dispatch(&self, text: &str) {
        let message = match parse_message(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "dropping unhandled event frame");
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        match message {
            WsMessage::Status(data) => {
                inner.queue_depth = data.status.exec_info.queue_remaining;
                if let Some(cb) = &self.callbacks.queue_count_changed {
                    cb(inner.queue_depth);
                }
            }
            WsMessage::ExecutionStart(data) => {
                inner.last_prompt = Some(data.prompt_id.clone());
                if let Some(item) = inner.items.get(&data.prompt_id) {
                    if let Some(cb) = &self.callbacks.queued_item_started {
                        cb(&data.prompt_id);
                    }
                    let sender = item.sender.clone();
                    let _ = sender
                        .send(PromptMessage::Started {
                            prompt_id: data.prompt_id.clone(),
                        })
                        .await;
                }
            }
            WsMessage::ExecutionCached(_) => {}
            WsMessage::Executing(data) => match data.node {
                None => {
                    self.finish(&mut inner, &data.prompt_id, StopReason::Finished, None)
                        .await;
                }
                Some(node_id) => {
                    if let Some(item) = inner.items.get(&data.prompt_id) {
                        let title = resolve_node_title(&item.workflow, &node_id);
                        let sender = item.sender.clone();
                        let _ = sender
                            .send(PromptMessage::Executing { node_id, title })
                            .await;
                    }
                }
            },
            WsMessage::Progress(data) => {
                let Some(prompt_id) = inner.last_prompt.clone() else {
                    tracing::debug!("dropping progress frame with no current submission");
                    return;
                };
                if let Some(item) = inner.items.get(&prompt_id) {
                    let sender = item.sender.clone();
                    let _ = sender
                        .send(PromptMessage::Progress {
                            value: data.value,
                            max: data.max,
                        })
                        .await;
                }
            }
            WsMessage::Executed(data) => {
                if let Some(item) = inner.items.get(&data.prompt_id) {
                    if let Some(cb) = &self.callbacks.queued_item_data_available {
                        cb(&data.prompt_id, &data.output);
                    }
                    let sender = item.sender.clone();
                    let _ = sender
                        .send(PromptMessage::Data {
                            node_id: data.node,
                            data: data.output,
                        })
                        .await;
                }
            }
            WsMessage::ExecutionInterrupted(data) => {
                self.finish(&mut inner, &data.prompt_id, StopReason::Interrupted, None)
                    .await;
            }
            WsMessage::ExecutionError(data) => {
                let node_name = inner
                    .items
                    .get(&data.prompt_id)
                    .map(|item| resolve_node_title(&item.workflow, &data.node_id))
                    .unwrap_or_else(|| data.node_id.clone());
                let failure = ExecutionFailure {
                    node_id: data.node_id,
                    node_type: data.node_type,
                    node_name,
                    exception_type: data.exception_type,
                    exception_message: data.exception_message,
                    traceback: data.traceback,
                };
                self.finish(&mut inner, &data.prompt_id, StopReason::Error, Some(failure))
                    .await;
            }
        }
    }

    /// Remove the record, fire the stopped callback, then emit the
    /// terminal message. Removal comes first so no later frame can reach
    /// the submission.
    async fn finish(
        &self,
        inner: &mut RegistryInner,
        prompt_id: &str,
        reason: StopReason,
        exception: Option<ExecutionFailure>,
    ) {
        let Some(item) = inner.items.remove(prompt_id) else {
            return;
        };
        if let Some(cb) = &self.callbacks.queued_item_stopped {
            cb(prompt_id, reason);
        }
        let _ = item
            .sender
            .send(PromptMessage::Stopped { reason, exception })
            .await;
    }
}

/// A plain-integer identifier names a workflow node directly; a compound
/// `"I:n"` identifier resolves to the outer instance `I`'s title.
fn resolve_node_title(workflow: &Graph, node_id: &str) -> String {
    let outer = node_id.split(':').next().unwrap_or(node_id);
    if let Ok(id) = outer.parse::<i64>() {
        if let Some(node) = workflow.node(id) {
            let title = node.title_or_display();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    node_id.to_string()
}
