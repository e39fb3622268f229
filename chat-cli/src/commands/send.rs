//! Send a text message.

use anyhow::{Context, Result};
use chat_client::{ChannelSink, EngineNotification};
use std::sync::Arc;
use std::time::Duration;

use super::{wait_until_live, ChatOptions};

/// How long to wait for the relay to echo the message back.
const ECHO_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the send command.
pub async fn run(options: &ChatOptions, text: &str) -> Result<()> {
    let (sink, mut notifications) = ChannelSink::new();
    let engine = options.build_engine(Arc::new(sink)).await?;
    let task = engine.clone().start();

    wait_until_live(&engine).await?;
    engine
        .send_text(text)
        .await
        .context("Failed to send message")?;

    // The relay assigns the id; it arrives with our own broadcast
    let echo = tokio::time::timeout(ECHO_TIMEOUT, async {
        while let Some(notification) = notifications.recv().await {
            if let EngineNotification::Message(event) = notification {
                if event.sender == options.sender_id() && event.text.as_deref() == Some(text) {
                    return Some(event.id);
                }
            }
        }
        None
    })
    .await;

    match echo {
        Ok(Some(id)) => println!("Sent as #{}", id),
        _ => println!("Sent (not yet confirmed by relay)"),
    }

    engine.stop().await;
    task.await.context("Chat engine task failed")?;
    Ok(())
}
