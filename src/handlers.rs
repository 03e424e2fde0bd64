//! Callback-style consumption of a submission's message channel.
//!
//! [`MessageHandlers`] holds optional per-message-kind callbacks; only
//! provide handlers for the messages you care about.
//! [`Submission::process_messages`] drains the channel until the
//! terminal stopped message, returning `Err` when the submission failed
//! server-side.

use std::collections::HashMap;

use crate::error::{ComfyError, Result};
use crate::messages::{DataOutput, ExecutionFailure, PromptMessage, StopReason};
use crate::queue::Submission;

type StartedFn = Box<dyn FnMut(&str) + Send>;
type ExecutingFn = Box<dyn FnMut(&str, &str) + Send>;
type ProgressFn = Box<dyn FnMut(i64, i64) + Send>;
type DataFn = Box<dyn FnMut(&str, &HashMap<String, Vec<DataOutput>>) + Send>;
type StoppedFn = Box<dyn FnMut(StopReason) + Send>;
type ErrorFn = Box<dyn FnMut(&ExecutionFailure) + Send>;
type CompleteFn = Box<dyn FnOnce() + Send>;

/// Optional callbacks for each translated message kind.
#[derive(Default)]
pub struct MessageHandlers {
    pub on_started: Option<StartedFn>,
    pub on_executing: Option<ExecutingFn>,
    pub on_progress: Option<ProgressFn>,
    pub on_data: Option<DataFn>,
    pub on_stopped: Option<StoppedFn>,
    /// Called before `on_stopped` when the submission failed.
    pub on_error: Option<ErrorFn>,
    /// Called after the loop exits, regardless of outcome.
    pub on_complete: Option<CompleteFn>,
}

impl MessageHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers that log lifecycle events.
    pub fn default_logging() -> Self {
        Self::new()
            .with_started(|prompt_id| {
                tracing::info!(prompt_id, "execution started");
            })
            .with_executing(|node_id, title| {
                tracing::info!(node_id, title, "executing node");
            })
            .with_error(|failure| {
                tracing::error!(
                    node_id = %failure.node_id,
                    node_type = %failure.node_type,
                    error = %failure.exception_message,
                    "execution error"
                );
            })
            .with_stopped(|reason| {
                if reason == StopReason::Finished {
                    tracing::info!("execution completed");
                }
            })
    }

    pub fn with_started(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_started = Some(Box::new(f));
        self
    }

    pub fn with_executing(mut self, f: impl FnMut(&str, &str) + Send + 'static) -> Self {
        self.on_executing = Some(Box::new(f));
        self
    }

    pub fn with_progress(mut self, f: impl FnMut(i64, i64) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn with_data(
        mut self,
        f: impl FnMut(&str, &HashMap<String, Vec<DataOutput>>) + Send + 'static,
    ) -> Self {
        self.on_data = Some(Box::new(f));
        self
    }

    pub fn with_stopped(mut self, f: impl FnMut(StopReason) + Send + 'static) -> Self {
        self.on_stopped = Some(Box::new(f));
        self
    }

    pub fn with_error(mut self, f: impl FnMut(&ExecutionFailure) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn with_complete(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl Submission {
    /// Drain the message channel, invoking handlers, until the terminal
    /// stopped message.
    ///
    /// Returns `ExecutionFailed` when the submission stopped with an
    /// exception, and `Unavailable` when the channel closed before the
    /// submission finished (the event channel failed permanently).
    pub async fn process_messages(&mut self, mut handlers: MessageHandlers) -> Result<()> {
        let mut outcome = Ok(());
        loop {
            match self.recv().await {
                Some(PromptMessage::Started { prompt_id }) => {
                    if let Some(f) = handlers.on_started.as_mut() {
                        f(&prompt_id);
                    }
                }
                Some(PromptMessage::Executing { node_id, title }) => {
                    if let Some(f) = handlers.on_executing.as_mut() {
                        f(&node_id, &title);
                    }
                }
                Some(PromptMessage::Progress { value, max }) => {
                    if let Some(f) = handlers.on_progress.as_mut() {
                        f(value, max);
                    }
                }
                Some(PromptMessage::Data { node_id, data }) => {
                    if let Some(f) = handlers.on_data.as_mut() {
                        f(&node_id, &data);
                    }
                }
                Some(PromptMessage::Stopped { reason, exception }) => {
                    if let Some(failure) = &exception {
                        if let Some(f) = handlers.on_error.as_mut() {
                            f(failure);
                        }
                        outcome = Err(ComfyError::ExecutionFailed(format!(
                            "{}: {}",
                            failure.exception_type, failure.exception_message
                        )));
                    }
                    if let Some(f) = handlers.on_stopped.as_mut() {
                        f(reason);
                    }
                    break;
                }
                None => {
                    outcome = Err(ComfyError::Unavailable(
                        "event channel closed before the submission finished".to_string(),
                    ));
                    break;
                }
            }
        }
        if let Some(f) = handlers.on_complete.take() {
            f();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ClientCallbacks, InFlight, SubmissionRegistry};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Arc;

    async fn submission_with_registry() -> (Arc<SubmissionRegistry>, Submission) {
        let registry = Arc::new(SubmissionRegistry::new(ClientCallbacks::default()));
        let (sender, messages) = registry.new_submission_channel();
        registry.lock().await.items.insert(
            "p-h".to_string(),
            InFlight {
                sender,
                workflow: crate::graph::Graph::default(),
            },
        );
        let submission = Submission {
            prompt_id: "p-h".to_string(),
            number: 1,
            node_errors: serde_json::Value::Null,
            messages,
        };
        (registry, submission)
    }

    fn frame(kind: &str, data: serde_json::Value) -> String {
        json!({"type": kind, "data": data}).to_string()
    }

    #[tokio::test]
    async fn handlers_observe_the_full_lifecycle() {
        let (registry, mut submission) = submission_with_registry().await;
        let feeder = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .dispatch(&frame("execution_start", json!({"prompt_id": "p-h"})))
                    .await;
                registry
                    .dispatch(&frame("progress", json!({"value": 10, "max": 20})))
                    .await;
                registry
                    .dispatch(&frame("executing", json!({"node": null, "prompt_id": "p-h"})))
                    .await;
            })
        };

        let started = Arc::new(AtomicBool::new(false));
        let steps = Arc::new(AtomicI64::new(0));
        let completed = Arc::new(AtomicBool::new(false));
        let (s, p, c) = (started.clone(), steps.clone(), completed.clone());

        let result = submission
            .process_messages(
                MessageHandlers::new()
                    .with_started(move |_| s.store(true, Ordering::SeqCst))
                    .with_progress(move |value, _| p.store(value, Ordering::SeqCst))
                    .with_complete(move || c.store(true, Ordering::SeqCst)),
            )
            .await;
        feeder.await.unwrap();

        assert!(result.is_ok());
        assert!(started.load(Ordering::SeqCst));
        assert_eq!(steps.load(Ordering::SeqCst), 10);
        assert!(completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_execution_returns_error_after_error_handler() {
        let (registry, mut submission) = submission_with_registry().await;
        let feeder = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .dispatch(&frame(
                        "execution_error",
                        json!({
                            "prompt_id": "p-h",
                            "node_id": "5",
                            "node_type": "KSampler",
                            "exception_message": "out of memory",
                            "exception_type": "RuntimeError"
                        }),
                    ))
                    .await;
            })
        };

        let saw_error = Arc::new(AtomicBool::new(false));
        let e = saw_error.clone();
        let result = submission
            .process_messages(
                MessageHandlers::new().with_error(move |_| e.store(true, Ordering::SeqCst)),
            )
            .await;
        feeder.await.unwrap();

        assert!(saw_error.load(Ordering::SeqCst));
        assert!(matches!(result, Err(ComfyError::ExecutionFailed(_))));
    }

    #[tokio::test]
    async fn closed_channel_surfaces_unavailable() {
        let (registry, mut submission) = submission_with_registry().await;
        registry.abort_all().await;
        let result = submission.process_messages(MessageHandlers::new()).await;
        assert!(matches!(result, Err(ComfyError::Unavailable(_))));
    }
}
