//! Download and decrypt a shared file.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::{ChatOptions, ProgressPrinter};

/// Run the download command.
///
/// Blob transfer is plain HTTP, so no sync connection is opened.
pub async fn run(options: &ChatOptions, hash: &str, output: &Path) -> Result<()> {
    let engine = options.build_engine(Arc::new(ProgressPrinter)).await?;

    let content = engine
        .download_file(hash)
        .await
        .with_context(|| format!("Failed to download {}", hash))?;

    tokio::fs::write(output, &content)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Saved {} bytes to {}", content.len(), output.display());
    Ok(())
}
