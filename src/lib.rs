//! # comfyui-graph
//!
//! Async Rust client for [ComfyUI](https://github.com/comfyanonymous/ComfyUI)
//! workflow graphs.
//!
//! Loads workflows authored in the visual editor (from JSON or straight
//! from a PNG's embedded metadata), binds typed, validated properties to
//! every node from the server's schema, flattens reusable subgraphs into
//! the wire form the server executes, and streams per-submission
//! progress and output events over a single reconnecting event channel.
//!
//! ## Quick Start
//!
//! ```no_run
//! use comfyui_graph::{ClientCallbacks, ComfyClient, MessageHandlers};
//!
//! # async fn example() -> comfyui_graph::Result<()> {
//! let client = ComfyClient::new("127.0.0.1", 8188, ClientCallbacks::default());
//! client.init().await?;
//!
//! // Load a workflow and set its inputs
//! let (mut graph, missing) = client
//!     .new_graph_from_json_file("workflow.json")
//!     .await?;
//! assert!(missing.is_empty(), "server lacks node types: {missing:?}");
//!
//! let sampler = graph.first_node_with_title("KSampler").unwrap().id;
//! graph.set_property_value(sampler, "seed", 42)?;
//! graph.set_property_value(sampler, "steps", 25)?;
//!
//! // Queue and stream execution events
//! client
//!     .queue_prompt_and_process(
//!         &graph,
//!         MessageHandlers::default_logging().with_progress(|value, max| {
//!             println!("step {value}/{max}");
//!         }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod catalogue;
pub mod client;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod messages;
pub mod png;
pub mod prompt;
pub mod properties;
pub mod queue;
pub mod subgraph;
pub mod websocket;
pub mod wire;

pub use catalogue::{NodeCatalogue, NodeObject};
pub use client::{
    ComfyClient, DeviceInfo, PromptHistoryItem, QueueExecInfo, SystemInfo, SystemStats,
    UploadKind, UploadTarget,
};
pub use error::{ComfyError, Result};
pub use graph::{Graph, Group, Node, PropertyHandle, SimpleApi, Slot};
pub use handlers::MessageHandlers;
pub use messages::{DataOutput, ExecutionFailure, PromptMessage, StopReason};
pub use prompt::{graph_to_prompt, Prompt, PromptNode};
pub use properties::{Property, PropertyKind, PropertyTarget};
pub use queue::{ClientCallbacks, Submission};
pub use subgraph::{Definitions, SubgraphDefinition, SubgraphPort};
pub use websocket::WsConfig;
pub use wire::{Link, LinkShape, Vec2, WidgetKey, WidgetValues};
