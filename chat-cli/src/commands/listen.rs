//! Stay connected and print messages as they arrive.

use anyhow::{Context, Result};
use chat_client::{ChannelSink, EngineNotification};
use std::sync::Arc;

use super::{format_event, ChatOptions};

/// Run the listen command until Ctrl-C.
pub async fn run(options: &ChatOptions, show_history: bool) -> Result<()> {
    let (sink, mut notifications) = ChannelSink::new();
    let engine = options.build_engine(Arc::new(sink)).await?;

    if show_history {
        for event in engine.history().await? {
            println!("{}", format_event(&event));
        }
    }

    eprintln!("Listening as {} (Ctrl-C to quit)", options.sender_id());
    let task = engine.clone().start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Some(EngineNotification::Message(event)) => println!("{}", format_event(&event)),
                Some(EngineNotification::Status { text, .. }) => eprintln!("* {}", text),
                Some(EngineNotification::Progress(_)) => {}
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    engine.stop().await;
    task.await.context("Chat engine task failed")?;
    Ok(())
}
