//! Load a workflow file, randomise the seed, and save the results.
//!
//! Requires a running ComfyUI instance at 127.0.0.1:8188 and a
//! `workflow.json` exported from the editor in the working directory.
//!
//! ```sh
//! cargo run --example simple_generation
//! ```

use comfyui_graph::{ClientCallbacks, ComfyClient};
use rand::Rng;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let client = ComfyClient::new("127.0.0.1", 8188, ClientCallbacks::default());
    client.init().await?;
    println!("Connected as {}", client.client_id());

    let (mut graph, missing) = client.new_graph_from_json_file("workflow.json").await?;
    if !missing.is_empty() {
        eprintln!("Server is missing node types: {missing:?}");
        return Ok(());
    }

    // Randomise every seed in the workflow
    let seed: i64 = rand::rng().random_range(0..i64::MAX);
    let sampler_ids: Vec<i64> = graph
        .nodes_with_type("KSampler")
        .iter()
        .map(|n| n.id)
        .collect();
    for id in sampler_ids {
        graph.set_property_value(id, "seed", seed)?;
    }
    println!("Seed: {seed}");

    let mut submission = client.queue_prompt(&graph).await?;
    println!("Queued prompt: {}", submission.prompt_id);

    let mut outputs = Vec::new();
    while let Some(message) = submission.recv().await {
        use comfyui_graph::PromptMessage::*;
        match message {
            Started { prompt_id } => println!("Started {prompt_id}"),
            Executing { title, .. } => println!("Executing {title}"),
            Progress { value, max } => println!("Step {value}/{max}"),
            Data { data, .. } => {
                for image in data.values().flatten() {
                    outputs.push(image.clone());
                }
            }
            Stopped { reason, .. } => println!("Stopped: {reason:?}"),
        }
    }

    for image in &outputs {
        let bytes = client.get_image(image).await?;
        std::fs::write(&image.filename, &bytes)?;
        println!("Saved: {}", image.filename);
    }

    Ok(())
}
