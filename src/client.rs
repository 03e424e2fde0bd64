//! The top-level client: REST surface, graph loading, submission, and
//! the event-channel lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::catalogue::NodeCatalogue;
use crate::error::{ComfyError, Result};
use crate::graph::Graph;
use crate::handlers::MessageHandlers;
use crate::messages::{parse_output_entry, DataOutput};
use crate::png::workflow_from_png;
use crate::queue::{ClientCallbacks, InFlight, Submission, SubmissionRegistry};
use crate::websocket::{ChannelState, EventChannel, WsConfig};

/// Server platform details from `/system_stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemStats {
    pub system: SystemInfo,
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub python_version: String,
    #[serde(default)]
    pub embedded_python: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub vram_total: i64,
    #[serde(default)]
    pub vram_free: i64,
    #[serde(default)]
    pub torch_vram_total: i64,
    #[serde(default)]
    pub torch_vram_free: i64,
}

/// Response of `GET /prompt`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueExecInfo {
    pub exec_info: crate::messages::ExecInfo,
}

/// One history entry: the submission's queue index, its original
/// workflow, and the data outputs keyed by node identifier.
#[derive(Debug, Clone)]
pub struct PromptHistoryItem {
    pub prompt_id: String,
    pub index: i64,
    pub graph: Option<Graph>,
    pub outputs: HashMap<String, Vec<DataOutput>>,
}

/// Server-side storage class for uploaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Input,
    Temp,
    Output,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Input => "input",
            UploadKind::Temp => "temp",
            UploadKind::Output => "output",
        }
    }
}

/// Binds an upload to a graph property so the uploaded filename lands in
/// the workflow (appended to the image combo and selected).
pub struct UploadTarget<'a> {
    pub graph: &'a mut Graph,
    pub node: i64,
    pub property: &'a str,
}

#[derive(Debug)]
pub(crate) struct AcceptedPrompt {
    pub prompt_id: String,
    pub number: i64,
    pub node_errors: Value,
}

/// The submission response is either a record or an error envelope; the
/// envelope is checked first because it can partially decode as the
/// success shape.
pub(crate) fn parse_submit_response(status: u16, body: &str) -> Result<AcceptedPrompt> {
    let value: Value = serde_json::from_str(body).map_err(|_| ComfyError::Http {
        status,
        body: body.to_string(),
    })?;
    if let Some(error) = value.get("error") {
        let kind = error
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("prompt rejected")
            .to_string();
        return Err(ComfyError::BadRequest { kind, message });
    }
    if status >= 400 {
        return Err(ComfyError::Http {
            status,
            body: body.to_string(),
        });
    }
    let prompt_id = value
        .get("prompt_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ComfyError::InvalidResponse("response missing prompt_id".to_string()))?
        .to_string();
    Ok(AcceptedPrompt {
        prompt_id,
        number: value.get("number").and_then(Value::as_i64).unwrap_or(0),
        node_errors: value.get("node_errors").cloned().unwrap_or(Value::Null),
    })
}

pub(crate) fn history_item_from_entry(prompt_id: &str, entry: &Value) -> PromptHistoryItem {
    let index = entry.pointer("/prompt/0").and_then(Value::as_i64).unwrap_or(0);
    let graph = entry
        .pointer("/prompt/3/extra_pnginfo/workflow")
        .and_then(|w| serde_json::from_value::<Graph>(w.clone()).ok())
        .map(|mut g| {
            g.rebuild_indices();
            g
        });
    let mut outputs = HashMap::new();
    if let Some(map) = entry.get("outputs").and_then(Value::as_object) {
        for (node_id, node_output) in map {
            if let Some(images) = node_output.get("images").and_then(Value::as_array) {
                let list: Vec<DataOutput> =
                    images.iter().filter_map(parse_output_entry).collect();
                outputs.insert(node_id.clone(), list);
            }
        }
    }
    PromptHistoryItem {
        prompt_id: prompt_id.to_string(),
        index,
        graph,
        outputs,
    }
}

/// Client for one ComfyUI server.
///
/// Construction is cheap; [`ComfyClient::init`] fetches the node
/// catalogue and opens the event channel. Graph loaders and
/// [`ComfyClient::queue_prompt`] initialise on demand.
pub struct ComfyClient {
    base: String,
    client_id: String,
    http: reqwest::Client,
    timeout: Duration,
    ws_config: WsConfig,
    registry: Arc<SubmissionRegistry>,
    catalogue: Mutex<Option<Arc<NodeCatalogue>>>,
    channel: Mutex<Option<EventChannel>>,
}

impl ComfyClient {
    /// Create a client for `host:port` with a fresh client identifier.
    pub fn new(host: impl Into<String>, port: u16, callbacks: ClientCallbacks) -> Self {
        Self {
            base: format!("{}:{}", host.into(), port),
            client_id: uuid::Uuid::new_v4().to_string(),
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
            ws_config: WsConfig::default(),
            registry: Arc::new(SubmissionRegistry::new(callbacks)),
            catalogue: Mutex::new(None),
            channel: Mutex::new(None),
        }
    }

    /// Use a custom `reqwest::Client` (connection pooling, TLS, proxies).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Per-request timeout for REST calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reconnection tuning for the event channel.
    pub fn with_ws_config(mut self, config: WsConfig) -> Self {
        self.ws_config = config;
        self
    }

    /// The unique client identifier sent with submissions and the event
    /// channel handshake.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.base, path)
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws?clientId={}", self.base, self.client_id)
    }

    /// Fetch the node catalogue and establish the event channel. Blocks
    /// until the first connection succeeds or the retry budget is spent.
    pub async fn init(&self) -> Result<()> {
        {
            let mut catalogue = self.catalogue.lock().await;
            if catalogue.is_none() {
                *catalogue = Some(Arc::new(self.get_object_infos().await?));
            }
        }
        let mut channel = self.channel.lock().await;
        let needs_spawn = match channel.as_ref() {
            None => true,
            Some(ch) => ch.state() == ChannelState::Failed,
        };
        if needs_spawn {
            *channel = Some(EventChannel::spawn(
                self.ws_url(),
                self.ws_config.clone(),
                Arc::clone(&self.registry),
            ));
        }
        if let Some(ch) = channel.as_ref() {
            ch.wait_until_connected().await?;
        }
        Ok(())
    }

    /// Probe the event channel with a keepalive frame. `false` marks the
    /// connection down; the next operation re-initialises.
    pub async fn is_initialized(&self) -> bool {
        if self.catalogue.lock().await.is_none() {
            return false;
        }
        match self.channel.lock().await.as_ref() {
            Some(ch) => ch.ping().await,
            None => false,
        }
    }

    /// Initialise unless already connected.
    pub async fn check_connection(&self) -> Result<()> {
        if self.is_initialized().await {
            return Ok(());
        }
        self.init().await
    }

    /// Stop the event channel and drop in-flight submissions.
    pub async fn shutdown(&self) {
        if let Some(ch) = self.channel.lock().await.take() {
            ch.shutdown();
        }
        self.registry.abort_all().await;
    }

    async fn node_catalogue(&self) -> Result<Arc<NodeCatalogue>> {
        if let Some(cat) = self.catalogue.lock().await.as_ref() {
            return Ok(Arc::clone(cat));
        }
        self.init().await?;
        self.catalogue
            .lock()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| ComfyError::Unavailable("node catalogue not loaded".to_string()))
    }

    // ── graph loading ───────────────────────────────────────────────

    /// Load a workflow from JSON and bind its properties against the
    /// server catalogue. The second element lists node kinds the server
    /// does not advertise; such nodes load but cannot be set.
    pub async fn new_graph_from_json(&self, text: &str) -> Result<(Graph, Vec<String>)> {
        let catalogue = self.node_catalogue().await?;
        let mut graph = Graph::from_json(text)?;
        let missing = graph.create_node_properties(&catalogue);
        Ok((graph, missing))
    }

    /// Like [`Self::new_graph_from_json`] but fails with
    /// [`ComfyError::MissingSchema`] when any node kind is unknown.
    pub async fn new_graph_from_json_strict(&self, text: &str) -> Result<Graph> {
        let (graph, missing) = self.new_graph_from_json(text).await?;
        if missing.is_empty() {
            Ok(graph)
        } else {
            Err(ComfyError::MissingSchema(missing))
        }
    }

    pub async fn new_graph_from_json_file(&self, path: &str) -> Result<(Graph, Vec<String>)> {
        let text = std::fs::read_to_string(path)?;
        self.new_graph_from_json(&text).await
    }

    /// Extract the embedded workflow from PNG bytes and load it.
    pub async fn new_graph_from_png(&self, data: &[u8]) -> Result<(Graph, Vec<String>)> {
        let text = workflow_from_png(data)?;
        self.new_graph_from_json(&text).await
    }

    pub async fn new_graph_from_png_file(&self, path: &str) -> Result<(Graph, Vec<String>)> {
        let data = std::fs::read(path)?;
        self.new_graph_from_png(&data).await
    }

    // ── submission ──────────────────────────────────────────────────

    /// Expand the workflow, submit it, and register the returned prompt
    /// id. The registry lock is held across the HTTP call so an event
    /// frame can never observe a half-installed record.
    pub async fn queue_prompt(&self, graph: &Graph) -> Result<Submission> {
        self.check_connection().await?;
        let prompt = graph.to_prompt(&self.client_id)?;

        let mut guard = self.registry.lock().await;
        let url = self.http_url("/prompt");
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&prompt)
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: format!("POST {url}"),
                source: e,
            })?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| ComfyError::Network {
                context: "reading submit response".to_string(),
                source: e,
            })?;
        let accepted = parse_submit_response(status, &body)?;

        let (sender, messages) = self.registry.new_submission_channel();
        guard.items.insert(
            accepted.prompt_id.clone(),
            InFlight {
                sender,
                workflow: graph.clone(),
            },
        );
        drop(guard);

        Ok(Submission {
            prompt_id: accepted.prompt_id,
            number: accepted.number,
            node_errors: accepted.node_errors,
            messages,
        })
    }

    /// Submit and drain in one call: queues the prompt, then processes
    /// messages with the given handlers until the submission stops.
    pub async fn queue_prompt_and_process(
        &self,
        graph: &Graph,
        handlers: MessageHandlers,
    ) -> Result<()> {
        let mut submission = self.queue_prompt(graph).await?;
        submission.process_messages(handlers).await
    }

    /// Whether a submission is still queued or executing.
    pub async fn is_in_flight(&self, prompt_id: &str) -> bool {
        self.registry.contains(prompt_id).await
    }

    /// Queue depth from the most recent server status broadcast.
    pub async fn queue_count(&self) -> i64 {
        self.registry.queue_depth().await
    }

    /// Best-effort request to stop the currently executing submission;
    /// completion arrives as a normal interrupted stop on its channel.
    pub async fn interrupt(&self) -> Result<()> {
        self.post_empty("/interrupt", &serde_json::json!({})).await
    }

    // ── REST surface ────────────────────────────────────────────────

    pub async fn get_system_stats(&self) -> Result<SystemStats> {
        self.get_json("/system_stats").await
    }

    pub async fn get_embeddings(&self) -> Result<Vec<String>> {
        self.get_json("/embeddings").await
    }

    pub async fn get_extensions(&self) -> Result<Vec<String>> {
        self.get_json("/extensions").await
    }

    /// Fetch and parse the full node catalogue.
    pub async fn get_object_infos(&self) -> Result<NodeCatalogue> {
        let value: Value = self.get_json("/object_info").await?;
        NodeCatalogue::from_value(value)
    }

    /// The server's own queue counter from `GET /prompt`.
    pub async fn get_queue_exec_info(&self) -> Result<QueueExecInfo> {
        self.get_json("/prompt").await
    }

    /// The `__metadata__` block of a model file (safetensors).
    pub async fn get_view_metadata(&self, folder: &str, file: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.http_url(&format!("/view_metadata/{folder}")),
            &[("filename", file)],
        )
        .map_err(|e| ComfyError::InvalidResponse(format!("bad metadata URL: {e}")))?;
        let resp = self
            .http
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: format!("GET {url}"),
                source: e,
            })?;
        let resp = ensure_success(resp).await?;
        resp.text()
            .await
            .map_err(|e| ComfyError::Network {
                context: "reading metadata response".to_string(),
                source: e,
            })
    }

    /// Download a produced artifact's raw bytes.
    pub async fn get_image(&self, output: &DataOutput) -> Result<Vec<u8>> {
        let url = reqwest::Url::parse_with_params(
            &self.http_url("/view"),
            &[
                ("filename", output.filename.as_str()),
                ("subfolder", output.subfolder.as_str()),
                ("type", output.kind.as_str()),
            ],
        )
        .map_err(|e| ComfyError::InvalidResponse(format!("bad image URL: {e}")))?;
        let resp = self
            .http
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: format!("GET {url}"),
                source: e,
            })?;
        let resp = ensure_success(resp).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ComfyError::Network {
                context: "reading image bytes".to_string(),
                source: e,
            })?;
        Ok(bytes.to_vec())
    }

    /// Full execution history keyed by prompt id.
    pub async fn get_prompt_history_by_id(
        &self,
    ) -> Result<HashMap<String, PromptHistoryItem>> {
        let raw: HashMap<String, Value> = self.get_json("/history").await?;
        Ok(raw
            .iter()
            .map(|(prompt_id, entry)| {
                (prompt_id.clone(), history_item_from_entry(prompt_id, entry))
            })
            .collect())
    }

    /// Execution history ordered by queue index. Indices are not
    /// recalculated server-side, so they are sorted here.
    pub async fn get_prompt_history_by_index(&self) -> Result<Vec<PromptHistoryItem>> {
        let mut items: Vec<PromptHistoryItem> = self
            .get_prompt_history_by_id()
            .await?
            .into_values()
            .collect();
        items.sort_by_key(|item| item.index);
        Ok(items)
    }

    pub async fn erase_history(&self) -> Result<()> {
        self.post_empty("/history", &serde_json::json!({"clear": "clear"}))
            .await
    }

    pub async fn erase_history_item(&self, prompt_id: &str) -> Result<()> {
        self.post_empty("/history", &serde_json::json!({"delete": [prompt_id]}))
            .await
    }

    // ── uploads ─────────────────────────────────────────────────────

    /// Upload image bytes via multipart `POST /upload/image`. Returns
    /// the filename the server chose (it may rename to avoid
    /// collisions). With a target, the final name is appended to the
    /// workflow's image combo and selected.
    pub async fn upload_image(
        &self,
        data: Vec<u8>,
        filename: &str,
        overwrite: bool,
        kind: UploadKind,
        subfolder: Option<&str>,
        target: Option<UploadTarget<'_>>,
    ) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(data).file_name(filename.to_string());
        let mut form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", overwrite.to_string())
            .text("type", kind.as_str().to_string());
        if let Some(sub) = subfolder {
            form = form.text("subfolder", sub.to_string());
        }
        let url = self.http_url("/upload/image");
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: format!("POST {url}"),
                source: e,
            })?;
        let resp = ensure_success(resp).await?;
        let value: Value = resp
            .json()
            .await
            .map_err(|e| ComfyError::Network {
                context: "decoding upload response".to_string(),
                source: e,
            })?;
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ComfyError::InvalidResponse("upload response missing name".to_string()))?
            .to_string();
        if let Some(target) = target {
            target
                .graph
                .apply_upload(target.node, target.property, &name)?;
        }
        Ok(name)
    }

    /// Upload a file from disk; the server-side filename defaults to the
    /// path's basename.
    pub async fn upload_image_file(
        &self,
        path: &str,
        overwrite: bool,
        kind: UploadKind,
        subfolder: Option<&str>,
        target: Option<UploadTarget<'_>>,
    ) -> Result<String> {
        let data = std::fs::read(path)?;
        let filename = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.png");
        self.upload_image(data, filename, overwrite, kind, subfolder, target)
            .await
    }

    // ── helpers ─────────────────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.http_url(path);
        let resp = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: format!("GET {url}"),
                source: e,
            })?;
        let resp = ensure_success(resp).await?;
        resp.json()
            .await
            .map_err(|e| ComfyError::Network {
                context: format!("decoding {path} response"),
                source: e,
            })
    }

    async fn post_empty(&self, path: &str, body: &Value) -> Result<()> {
        let url = self.http_url(path);
        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ComfyError::Network {
                context: format!("POST {url}"),
                source: e,
            })?;
        ensure_success(resp).await?;
        Ok(())
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ComfyError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}
