//! Transport port: where messages come from and where replies go.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::conversation::{Message, Reply};
use crate::error::{Error, Result};

/// Inbound buffer size for the in-memory transport.
const CHANNEL_BUFFER: usize = 100;

/// A chat platform client as seen by the router.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start receiving and hand over the inbound stream. Only one caller
    /// gets it.
    async fn updates(&self) -> Result<mpsc::Receiver<Message>>;

    /// Deliver one reply. Failures are the caller's to log.
    async fn send(&self, reply: &Reply) -> Result<()>;

    /// Stop supplying updates; the inbound stream ends.
    fn stop_receiving(&self);
}

/// In-memory transport. Tests push inbound messages and read back replies.
pub struct ChannelTransport {
    inbound_tx: Mutex<Option<mpsc::Sender<Message>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    sent_tx: mpsc::UnboundedSender<Reply>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Reply>>,
    stopped: AtomicBool,
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();

        Self {
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            sent_tx,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
            stopped: AtomicBool::new(false),
        }
    }

    /// Inject an inbound message.
    pub async fn push(&self, message: Message) -> Result<()> {
        let sender = self
            .inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Transport("transport stopped receiving".to_string()))?;

        sender
            .send(message)
            .await
            .map_err(|_| Error::Transport("inbound stream closed".to_string()))
    }

    /// Wait for the next reply the router sent.
    pub async fn recv_sent(&self) -> Option<Reply> {
        self.sent_rx.lock().await.recv().await
    }

    /// Replies sent so far that nobody has read yet.
    pub async fn drain_sent(&self) -> Vec<Reply> {
        let mut rx = self.sent_rx.lock().await;
        let mut replies = Vec::new();
        while let Ok(reply) = rx.try_recv() {
            replies.push(reply);
        }
        replies
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn updates(&self) -> Result<mpsc::Receiver<Message>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Transport("updates already taken".to_string()))
    }

    async fn send(&self, reply: &Reply) -> Result<()> {
        self.sent_tx
            .send(reply.clone())
            .map_err(|_| Error::Transport("reply receiver dropped".to_string()))
    }

    fn stop_receiving(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::Sender;

    #[tokio::test]
    async fn test_channel_transport() {
        let transport = ChannelTransport::new();
        let mut updates = transport.updates().await.unwrap();
        assert!(transport.updates().await.is_err());

        transport
            .push(Message::new(1, Sender::default(), "hi"))
            .await
            .unwrap();
        assert_eq!(updates.recv().await.unwrap().text, "hi");

        transport.send(&Reply::new(1, "hello")).await.unwrap();
        assert_eq!(transport.recv_sent().await.unwrap().text, "hello");
        assert!(transport.drain_sent().await.is_empty());

        transport.stop_receiving();
        assert!(transport.is_stopped());
        assert!(updates.recv().await.is_none());
        assert!(transport
            .push(Message::new(1, Sender::default(), "late"))
            .await
            .is_err());
    }
}
