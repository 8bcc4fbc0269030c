//! Line-oriented transport for running the bot without a chat network.
//!
//! Each input line is `<owner_id> <message>`; each reply is written back as
//! `[<owner_id>] <reply>`.

use super::{BotService, Reply};
use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Splits `<owner_id> <message>`.
pub fn parse_line(line: &str) -> Option<(i64, &str)> {
    let line = line.trim();
    let (owner, message) = line.split_once(char::is_whitespace)?;
    let owner_id = owner.parse().ok()?;
    let message = message.trim();
    if message.is_empty() {
        return None;
    }
    Some((owner_id, message))
}

/// Serves `input` until it ends, writing replies to `output`.
pub async fn run<R, W>(service: &BotService, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        if line.trim().is_empty() {
            continue;
        }
        let Some((owner_id, message)) = parse_line(&line) else {
            warn!("Ignoring malformed line, expected '<owner_id> <message>'");
            continue;
        };

        debug!(owner_id, "Handling message");
        let reply: Reply = service.handle(owner_id, message).await;
        output
            .write_all(format!("[{}] {}\n", owner_id, reply).as_bytes())
            .await
            .context("Failed to write reply")?;
        output.flush().await.context("Failed to flush reply")?;
    }
    Ok(())
}
