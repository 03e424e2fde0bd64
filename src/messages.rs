//! Event-channel message types.
//!
//! The server sends JSON frames shaped `{"type": "<kind>", "data": {…}}`
//! over the event channel. [`parse_message`] decodes them into the
//! strongly-typed [`WsMessage`] enum; node identifiers stay strings so
//! compound subgraph identifiers survive untouched.
//!
//! [`PromptMessage`] is the outbound side: the translated, per-submission
//! messages a consumer reads from its [`crate::Submission`] channel.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// All known event-channel frame kinds.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Server status broadcast (queue depth).
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has started executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A specific node is executing; `node: None` signals the prompt
    /// finished.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step-level progress within a long-running node. Carries no prompt
    /// identifier.
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node finished and produced output data.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Execution was interrupted at the server.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(InterruptedData),

    /// Execution failed with an exception.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    #[serde(deserialize_with = "deserialize_outputs")]
    pub output: HashMap<String, Vec<DataOutput>>,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub executed: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub executed: Vec<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// One produced artifact: a file reference, or raw text when the node
/// emitted a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataOutput {
    pub filename: String,
    pub subfolder: String,
    pub kind: String,
    pub text: Option<String>,
}

/// Output lists mix file descriptors and bare strings; entries of
/// neither shape are dropped with a log line.
fn deserialize_outputs<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, Vec<DataOutput>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: HashMap<String, Value> = HashMap::deserialize(deserializer)?;
    let mut out = HashMap::new();
    for (key, value) in raw {
        let Some(items) = value.as_array() else {
            continue;
        };
        let mut entries = Vec::new();
        for item in items {
            if let Some(entry) = parse_output_entry(item) {
                entries.push(entry);
            } else {
                tracing::warn!(output = %key, "dropping output entry of unknown shape");
            }
        }
        out.insert(key, entries);
    }
    Ok(out)
}

pub(crate) fn parse_output_entry(value: &Value) -> Option<DataOutput> {
    if let Some(map) = value.as_object() {
        let filename = map.get("filename")?.as_str()?.to_string();
        let subfolder = map
            .get("subfolder")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = map.get("type")?.as_str()?.to_string();
        return Some(DataOutput {
            filename,
            subfolder,
            kind,
            text: None,
        });
    }
    if let Some(text) = value.as_str() {
        return Some(DataOutput {
            kind: "text".to_string(),
            text: Some(text.to_string()),
            ..Default::default()
        });
    }
    None
}

/// Parse an event-channel text frame into a typed message.
///
/// Returns `Err` for malformed JSON or unknown `type` values; callers
/// log and drop such frames rather than failing the stream.
pub fn parse_message(text: &str) -> Result<WsMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Why a submission stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Finished,
    Interrupted,
    Error,
}

/// Server-side exception details carried by a failed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub node_id: String,
    pub node_type: String,
    pub node_name: String,
    pub exception_type: String,
    pub exception_message: String,
    pub traceback: Vec<String>,
}

/// Translated, per-submission execution message.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptMessage {
    /// Execution of the submission has begun.
    Started { prompt_id: String },
    /// A node is executing; the title resolves through the originating
    /// workflow (compound identifiers use the outer instance's title).
    Executing { node_id: String, title: String },
    /// Step progress, attributed to the most recently started submission.
    Progress { value: i64, max: i64 },
    /// A node produced output data.
    Data {
        node_id: String,
        data: HashMap<String, Vec<DataOutput>>,
    },
    /// Terminal message; nothing follows it on the channel.
    Stopped {
        reason: StopReason,
        exception: Option<ExecutionFailure>,
    },
}
