//! Line-oriented stdin/stdout channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{allow_list_matches, Channel};
use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::error::{PalaverError, Result};

pub const CHANNEL_NAME: &str = "terminal";
const LOCAL_CHAT: &str = "local";
const LOCAL_SENDER: &str = "user";

/// Reads prompts line by line from stdin and prints replies to stdout.
///
/// Intermediate stream renders are skipped; a line-oriented surface cannot
/// edit output in place, so only the final render is printed.
pub struct TerminalChannel {
    bus: Arc<MessageBus>,
    cancel: CancellationToken,
    allow_from: Vec<String>,
    running: AtomicBool,
}

impl TerminalChannel {
    pub fn new(bus: Arc<MessageBus>, cancel: CancellationToken, allow_from: Vec<String>) -> Self {
        Self {
            bus,
            cancel,
            allow_from,
            running: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Channel for TerminalChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PalaverError::InvalidState(
                "terminal channel already started".to_string(),
            ));
        }
        let bus = Arc::clone(&self.bus);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        let content = line.trim();
                        if content.is_empty() {
                            continue;
                        }
                        let message =
                            InboundMessage::new(CHANNEL_NAME, LOCAL_SENDER, LOCAL_CHAT, content);
                        if bus.publish_inbound(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed, stopping terminal reader");
                        cancel.cancel();
                        break;
                    }
                    Err(err) => {
                        debug!(error = %err, "stdin read failed");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        println!("{}", message.content);
        Ok(())
    }

    async fn render(&self, _chat_id: &str, content: &str, finished: bool) -> Result<()> {
        if finished {
            println!("{content}");
        }
        Ok(())
    }

    fn is_allowed(&self, sender_id: &str, username: &str) -> bool {
        allow_list_matches(&self.allow_from, sender_id, username)
    }
}
