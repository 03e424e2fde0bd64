//! Track per-step progress with handler callbacks.
//!
//! Requires a running ComfyUI instance at 127.0.0.1:8188 and a
//! `workflow.json` exported from the editor in the working directory.
//!
//! ```sh
//! cargo run --example progress_tracking
//! ```

use comfyui_graph::{ClientCallbacks, ComfyClient, MessageHandlers};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let callbacks = ClientCallbacks {
        queue_count_changed: Some(Box::new(|depth| {
            println!("Server queue depth: {depth}");
        })),
        ..Default::default()
    };
    let client = ComfyClient::new("127.0.0.1", 8188, callbacks);
    client.init().await?;

    let (graph, missing) = client.new_graph_from_json_file("workflow.json").await?;
    if !missing.is_empty() {
        eprintln!("Server is missing node types: {missing:?}");
        return Ok(());
    }

    client
        .queue_prompt_and_process(
            &graph,
            MessageHandlers::default_logging()
                .with_progress(|value, max| {
                    let percent = (value as f64 / max.max(1) as f64) * 100.0;
                    println!("Step {value}/{max} ({percent:.0}%)");
                })
                .with_data(|node_id, data| {
                    for image in data.values().flatten() {
                        println!("Node {node_id} produced {}", image.filename);
                    }
                }),
        )
        .await?;

    Ok(())
}
