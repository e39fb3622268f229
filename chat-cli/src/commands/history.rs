//! Print the locally stored history.

use anyhow::Result;
use chat_client::LocalMirror;

use super::{format_event, ChatOptions};

/// Run the history command.
pub async fn run(options: &ChatOptions, limit: Option<usize>) -> Result<()> {
    let mirror = options.open_mirror().await?;
    let lines = history_lines(&mirror, limit).await?;

    if lines.is_empty() {
        println!("No messages stored yet.");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

/// Formatted history, oldest first, optionally only the last `limit`.
async fn history_lines(mirror: &LocalMirror, limit: Option<usize>) -> Result<Vec<String>> {
    let history = mirror.history().await?;
    let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
    Ok(history.iter().skip(skip).map(format_event).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::ChatEvent;

    async fn mirror_with(n: u32) -> LocalMirror {
        let mirror = LocalMirror::in_memory().await.unwrap();
        for id in 1..=n {
            let mut event = ChatEvent::text("alice", format!("m{id}"));
            event.id = id;
            mirror.insert(&event).await.unwrap();
        }
        mirror
    }

    #[tokio::test]
    async fn lists_everything_in_order() {
        let lines = history_lines(&mirror_with(3).await, None).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("alice: m1"));
        assert!(lines[2].ends_with("alice: m3"));
    }

    #[tokio::test]
    async fn limit_keeps_most_recent() {
        let lines = history_lines(&mirror_with(5).await, Some(2)).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("#4"));
        assert!(lines[1].contains("#5"));

        let lines = history_lines(&mirror_with(1).await, Some(10)).await.unwrap();
        assert_eq!(lines.len(), 1);
    }
}
