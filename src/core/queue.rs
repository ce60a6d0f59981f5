//! Per-conversation message queue.
//!
//! Each conversation gets a bounded buffer served by exactly one worker task.
//! The worker handles messages one at a time in arrival order and retires the
//! queue after an idle period or on cancellation. A retired queue is never
//! reused; the manager replaces it.
//!
//! Past the buffer there is a bounded overflow of hand-off tasks, one slot per
//! buffered message. A producer only has to wait once both are full.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use super::conversation::Message;
use crate::config::QueueSettings;
use crate::error::QueueError;

/// Something that consumes messages off a conversation queue.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, message: Message);
}

/// Render a panic payload for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Producer side of one conversation's queue.
pub struct ConversationQueue {
    conversation_id: String,
    sender: mpsc::Sender<Message>,
    retired: Arc<AtomicBool>,
    finished: watch::Receiver<bool>,
    /// Last hand-off still waiting for buffer space, if any.
    handoff: Mutex<Option<JoinHandle<()>>>,
    /// One permit per hand-off in flight.
    handoff_slots: Arc<Semaphore>,
}

impl ConversationQueue {
    /// Create a queue and its (not yet started) worker.
    pub fn new(
        conversation_id: &str,
        processor: Arc<dyn MessageProcessor>,
        settings: &QueueSettings,
        cancel: CancellationToken,
    ) -> (Self, QueueWorker) {
        let capacity = settings.capacity.max(1);
        let handoff_limit = u32::try_from(capacity).unwrap_or(u32::MAX);
        let (sender, receiver) = mpsc::channel(capacity);
        let (finished_tx, finished_rx) = watch::channel(false);
        let retired = Arc::new(AtomicBool::new(false));
        let handoff_slots = Arc::new(Semaphore::new(handoff_limit as usize));

        let queue = Self {
            conversation_id: conversation_id.to_string(),
            sender,
            retired: retired.clone(),
            finished: finished_rx,
            handoff: Mutex::new(None),
            handoff_slots: handoff_slots.clone(),
        };
        let worker = QueueWorker {
            conversation_id: conversation_id.to_string(),
            receiver,
            processor,
            idle_timeout: settings.idle_timeout(),
            cancel,
            retired,
            finished: finished_tx,
            predecessor: None,
            handoff_slots,
            handoff_limit,
        };

        (queue, worker)
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Whether the queue stopped accepting messages.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst) || self.sender.is_closed()
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow() || self.finished.has_changed().is_err()
    }

    /// Append a message straight to the buffer, waiting while it is full.
    ///
    /// This bypasses the overflow, so don't mix it with `offer`/`push` on the
    /// same queue.
    pub async fn add(&self, message: Message) -> Result<(), QueueError> {
        if self.is_retired() {
            return Err(QueueError::Retired(message));
        }
        self.sender
            .send(message)
            .await
            .map_err(|e| QueueError::Retired(e.0))
    }

    /// Append a message, waiting only while the buffer and the overflow are
    /// both full.
    pub async fn push(&self, mut message: Message) -> Result<(), QueueError> {
        loop {
            match self.offer(message) {
                Err(QueueError::Full(refused)) => {
                    tracing::debug!(
                        conversation = %self.conversation_id,
                        "conversation overflow full, waiting for a hand-off slot"
                    );
                    // Closed once the queue retires.
                    if self.handoff_slots.acquire().await.is_err() {
                        return Err(QueueError::Retired(refused));
                    }
                    message = refused;
                }
                other => return other,
            }
        }
    }

    /// Append a message without waiting.
    ///
    /// When the buffer is full, or an earlier hand-off is still waiting, the
    /// message goes to a hand-off task chained behind the previous one, so
    /// arrival order is kept. Fails with `Full` once every hand-off slot is
    /// taken.
    pub fn offer(&self, message: Message) -> Result<(), QueueError> {
        if self.is_retired() {
            return Err(QueueError::Retired(message));
        }

        let mut handoff = self.handoff.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = handoff.take().filter(|task| !task.is_finished());

        let message = if previous.is_none() {
            match self.sender.try_send(message) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(message)) => return Err(QueueError::Retired(message)),
                Err(TrySendError::Full(message)) => {
                    tracing::debug!(
                        conversation = %self.conversation_id,
                        "conversation queue full, waiting for space"
                    );
                    message
                }
            }
        } else {
            message
        };

        let slot = match self.handoff_slots.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => {
                *handoff = previous;
                return Err(QueueError::Full(message));
            }
            Err(TryAcquireError::Closed) => {
                *handoff = previous;
                return Err(QueueError::Retired(message));
            }
        };

        let sender = self.sender.clone();
        let conversation_id = self.conversation_id.clone();
        *handoff = Some(tokio::spawn(async move {
            let _slot = slot;
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            // An idle worker waits for in-flight hand-offs, so only a
            // shutdown gets here.
            if let Err(refused) = sender.send(message).await {
                tracing::warn!(
                    conversation = %conversation_id,
                    message_id = ?refused.0.message_id,
                    "conversation queue shut down before hand-off, message dropped"
                );
            }
        }));

        Ok(())
    }

    pub(crate) fn finished(&self) -> watch::Receiver<bool> {
        self.finished.clone()
    }

    /// Occupy one hand-off slot, as an in-flight hand-off would.
    #[cfg(test)]
    pub(crate) fn hold_handoff_slot(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        self.handoff_slots.clone().try_acquire_owned().ok()
    }
}

/// Consumer side of one conversation's queue. Started exactly once.
pub struct QueueWorker {
    conversation_id: String,
    receiver: mpsc::Receiver<Message>,
    processor: Arc<dyn MessageProcessor>,
    idle_timeout: Duration,
    cancel: CancellationToken,
    retired: Arc<AtomicBool>,
    finished: watch::Sender<bool>,
    predecessor: Option<watch::Receiver<bool>>,
    handoff_slots: Arc<Semaphore>,
    handoff_limit: u32,
}

impl QueueWorker {
    /// Hold off serving until a retired queue's worker for the same
    /// conversation has exited.
    pub fn after(mut self, predecessor: &ConversationQueue) -> Self {
        self.predecessor = Some(predecessor.finished());
        self
    }

    /// Spawn the worker task.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        if let Some(mut predecessor) = self.predecessor.take() {
            // A dropped sender means the predecessor is gone as well.
            let _ = predecessor.wait_for(|done| *done).await;
        }

        tracing::debug!(conversation = %self.conversation_id, "conversation worker started");

        let idle = sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.retire();
                    tracing::debug!(conversation = %self.conversation_id, "conversation worker cancelled");
                    break;
                }
                received = self.receiver.recv() => match received {
                    Some(message) => {
                        self.process(message).await;
                        idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    }
                    None => {
                        self.retire();
                        break;
                    }
                },
                _ = &mut idle => {
                    // Refuse new messages first, then let in-flight hand-offs land.
                    self.retired.store(true, Ordering::SeqCst);
                    let settled = self.settle_handoffs().await;
                    self.retire();
                    if !settled {
                        tracing::debug!(conversation = %self.conversation_id, "conversation worker cancelled");
                        break;
                    }
                    // Messages that slipped in before the close.
                    while let Ok(message) = self.receiver.try_recv() {
                        self.process(message).await;
                    }
                    tracing::debug!(conversation = %self.conversation_id, "conversation queue retired after idle timeout");
                    break;
                }
            }
        }

        let _ = self.finished.send(true);
    }

    /// Keep serving until no hand-off is in flight. Returns false if
    /// cancelled first.
    async fn settle_handoffs(&mut self) -> bool {
        let settled = self
            .handoff_slots
            .clone()
            .acquire_many_owned(self.handoff_limit);
        tokio::pin!(settled);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                _ = &mut settled => return true,
                Some(message) = self.receiver.recv() => self.process(message).await,
            }
        }
    }

    fn retire(&mut self) {
        self.retired.store(true, Ordering::SeqCst);
        self.handoff_slots.close();
        self.receiver.close();
    }

    async fn process(&self, message: Message) {
        let processing = AssertUnwindSafe(self.processor.process(message)).catch_unwind();
        if let Err(payload) = processing.await {
            tracing::error!(
                conversation = %self.conversation_id,
                panic = %panic_message(payload.as_ref()),
                "message processing panicked"
            );
        }
    }
}
