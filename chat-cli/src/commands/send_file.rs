//! Upload a file and announce it to the room.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::{wait_until_live, ChatOptions, ProgressPrinter};

/// Run the send-file command.
pub async fn run(options: &ChatOptions, path: &Path) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("Not a file: {}", path.display());
    }

    let engine = options.build_engine(Arc::new(ProgressPrinter)).await?;
    let task = engine.clone().start();

    wait_until_live(&engine).await?;
    println!("Uploading {}...", path.display());
    let hash = engine
        .share_file(path)
        .await
        .with_context(|| format!("Failed to share {}", path.display()))?;

    println!("Shared {}", path.display());
    println!("  Hash: {}", hash);

    engine.stop().await;
    task.await.context("Chat engine task failed")?;
    Ok(())
}
