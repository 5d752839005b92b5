use anyhow::{anyhow, Context};
use message_sync::events::StoreEvent;
use message_sync::{logging, Config, SyncSession};
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

/// Chat with one peer from the terminal.
///
/// Usage: `message-sync <peer-uuid>`; the local identity comes from
/// `SYNC_USER_ID`. Each stdin line is sent to the peer; EOF disconnects.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let peer_id = env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: message-sync <peer-uuid>"))?;
    let peer_id = Uuid::parse_str(&peer_id).context("peer id is not a valid UUID")?;

    let config = Config::from_env().context("failed to load configuration")?;
    let user_id = config
        .user_id
        .ok_or_else(|| anyhow!("SYNC_USER_ID must be set"))?;

    let session = SyncSession::from_config(&config, user_id)
        .await
        .context("failed to open sync session")?;
    session.connect().await.context("failed to connect")?;

    for message in &session.conversation(peer_id).await {
        let who = if message.sender_id == user_id { "me" } else { "them" };
        println!("[{}] {who}: {} ({})", message.timestamp, message.content, message.status);
    }
    match session.mark_conversation_read(peer_id).await {
        Ok(marked) if marked > 0 => tracing::info!(marked, "marked thread read"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "could not mark thread read"),
    }

    let (_subscriber, mut events) = session.subscribe().await;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                StoreEvent::Inserted(message) if message.sender_id == peer_id => {
                    println!("them: {}", message.content);
                }
                StoreEvent::StatusChanged {
                    message_id, status, ..
                } => println!("  {message_id} -> {status}"),
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        if let Err(e) = session.send_message(peer_id, content).await {
            let kind = if e.is_retryable() { "retryable" } else { "permanent" };
            eprintln!("send failed ({kind}): {e}");
        }
    }

    session.disconnect().await?;
    printer.abort();
    Ok(())
}
