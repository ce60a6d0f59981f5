//! Registry of per-conversation queues.
//!
//! Queues are created lazily on a conversation's first message and replaced
//! once retired. Retired entries are not deleted on the spot: a periodic
//! sweep removes them once their worker has exited, so a replacement can
//! always find the worker it has to wait for.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::conversation::Message;
use super::queue::{ConversationQueue, MessageProcessor};
use crate::config::QueueSettings;
use crate::error::QueueError;

/// Owns the conversation-id → queue registry.
#[derive(Clone)]
pub struct QueueManager {
    queues: Arc<RwLock<HashMap<String, Arc<ConversationQueue>>>>,
    processor: Arc<dyn MessageProcessor>,
    settings: QueueSettings,
    cancel: CancellationToken,
}

impl QueueManager {
    /// Create a manager. Workers it starts stop when `cancel` fires.
    pub fn new(
        processor: Arc<dyn MessageProcessor>,
        settings: QueueSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            processor,
            settings,
            cancel,
        }
    }

    /// Return the active queue for a conversation, creating (or replacing a
    /// retired) one as needed.
    pub async fn get_or_create_queue(&self, conversation_id: &str) -> Arc<ConversationQueue> {
        {
            let queues = self.queues.read().await;
            if let Some(queue) = queues.get(conversation_id) {
                if !queue.is_retired() {
                    return queue.clone();
                }
            }
        }

        let mut queues = self.queues.write().await;
        // Another caller may have replaced it while we waited for the lock.
        let previous = match queues.get(conversation_id) {
            Some(queue) if !queue.is_retired() => return queue.clone(),
            Some(queue) => Some(queue.clone()),
            None => None,
        };

        let (queue, worker) = ConversationQueue::new(
            conversation_id,
            self.processor.clone(),
            &self.settings,
            self.cancel.clone(),
        );
        match &previous {
            Some(previous) => worker.after(previous).start(),
            None => worker.start(),
        };

        let queue = Arc::new(queue);
        queues.insert(conversation_id.to_string(), queue.clone());

        tracing::debug!(
            conversation = %conversation_id,
            replaced = previous.is_some(),
            "created conversation queue"
        );
        queue
    }

    /// Hand a message to its conversation's queue.
    ///
    /// Returns right away unless that conversation's buffer and overflow are
    /// both full; then it waits, which holds up the caller's intake.
    pub async fn dispatch(&self, message: Message) {
        let conversation_id = message.conversation_id();
        let queue = self.get_or_create_queue(&conversation_id).await;
        self.deliver(&conversation_id, &queue, message).await;
    }

    async fn deliver(&self, conversation_id: &str, queue: &ConversationQueue, message: Message) {
        let Err(refused) = self.push(queue, message).await else {
            return;
        };

        // The queue retired between lookup and hand-off.
        let queue = self.get_or_create_queue(conversation_id).await;
        if let Err(refused) = self.push(&queue, refused.into_message()).await {
            tracing::warn!(
                conversation = %conversation_id,
                error = %refused,
                "could not enqueue message"
            );
        }
    }

    /// Push into `queue`; on shutdown the message is dropped instead.
    async fn push(&self, queue: &ConversationQueue, message: Message) -> Result<(), QueueError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(conversation = %queue.conversation_id(), "shutting down, dropping message");
                Ok(())
            }
            result = queue.push(message) => result,
        }
    }

    /// Remove retired queues whose worker has exited. Returns how many went.
    pub async fn sweep(&self) -> usize {
        let mut queues = self.queues.write().await;
        let before = queues.len();
        queues.retain(|_, queue| !(queue.is_retired() && queue.is_finished()));
        before - queues.len()
    }

    /// Spawn the periodic sweep. It stops with the cancellation token.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.settings.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = manager.sweep().await;
                        if removed > 0 {
                            tracing::debug!(removed, "swept retired conversation queues");
                        }
                    }
                }
            }
        })
    }

    /// Number of registered queues, retired ones included until swept.
    pub async fn len(&self) -> usize {
        self.queues.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queues.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::Sender;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};
    use tokio::time::{sleep, timeout};

    /// Records (conversation, text); messages with text "hold" wait for a permit.
    struct Recorder {
        seen: mpsc::UnboundedSender<(String, String)>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl MessageProcessor for Recorder {
        async fn process(&self, message: Message) {
            if message.text == "hold" {
                self.gate.acquire().await.unwrap().forget();
            }
            self.seen
                .send((message.conversation_id(), message.text))
                .unwrap();
        }
    }

    fn manager(
        cancel: CancellationToken,
    ) -> (QueueManager, mpsc::UnboundedReceiver<(String, String)>, Arc<Semaphore>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let processor = Arc::new(Recorder {
            seen: tx,
            gate: gate.clone(),
        });
        (
            QueueManager::new(processor, QueueSettings::default(), cancel),
            rx,
            gate,
        )
    }

    fn msg(chat_id: i64, text: &str) -> Message {
        Message::new(chat_id, Sender::default(), text)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuses_active_queue() {
        let (manager, _seen, _gate) = manager(CancellationToken::new());

        let a = manager.get_or_create_queue("1").await;
        let b = manager.get_or_create_queue("1").await;
        let c = manager.get_or_create_queue("2").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_per_conversation_with_interleaving() {
        let (manager, mut seen, _gate) = manager(CancellationToken::new());

        for i in 0..4 {
            manager.dispatch(msg(1, &format!("a{}", i))).await;
            manager.dispatch(msg(2, &format!("b{}", i))).await;
            manager.dispatch(msg(3, &format!("c{}", i))).await;
        }

        let mut per_conversation: HashMap<String, Vec<String>> = HashMap::new();
        for _ in 0..12 {
            let (conversation, text) = seen.recv().await.unwrap();
            per_conversation.entry(conversation).or_default().push(text);
        }

        assert_eq!(per_conversation["1"], vec!["a0", "a1", "a2", "a3"]);
        assert_eq!(per_conversation["2"], vec!["b0", "b1", "b2", "b3"]);
        assert_eq!(per_conversation["3"], vec!["c0", "c1", "c2", "c3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_conversation_does_not_stall_others() {
        let (manager, mut seen, gate) = manager(CancellationToken::new());

        // Conversation 1 is stuck on "hold" with a backlog well past capacity.
        manager.dispatch(msg(1, "hold")).await;
        for i in 0..8 {
            manager.dispatch(msg(1, &format!("a{}", i))).await;
        }

        let dispatched = timeout(Duration::from_secs(1), manager.dispatch(msg(2, "b0"))).await;
        assert!(dispatched.is_ok());
        assert_eq!(seen.recv().await.unwrap(), ("2".to_string(), "b0".to_string()));

        gate.add_permits(1);
        assert_eq!(seen.recv().await.unwrap().1, "hold");
        for i in 0..8 {
            assert_eq!(seen.recv().await.unwrap().1, format!("a{}", i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_blocks_once_buffer_and_overflow_are_full() {
        let (tx, mut seen) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let processor = Arc::new(Recorder {
            seen: tx,
            gate: gate.clone(),
        });
        let settings = QueueSettings {
            capacity: 2,
            ..QueueSettings::default()
        };
        let manager = QueueManager::new(processor, settings, CancellationToken::new());

        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = dispatched.clone();
        let producer = manager.clone();
        let intake = tokio::spawn(async move {
            producer.dispatch(msg(1, "hold")).await;
            counter.fetch_add(1, Ordering::SeqCst);
            for i in 0..20 {
                producer.dispatch(msg(1, &format!("a{}", i))).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // One in the worker, two buffered, two in the overflow.
        sleep(Duration::from_secs(1)).await;
        assert_eq!(dispatched.load(Ordering::SeqCst), 5);
        assert!(!intake.is_finished());

        gate.add_permits(1);
        intake.await.unwrap();
        assert_eq!(seen.recv().await.unwrap().1, "hold");
        for i in 0..20 {
            assert_eq!(seen.recv().await.unwrap().1, format!("a{}", i));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_blocked_dispatch() {
        let cancel = CancellationToken::new();
        let (tx, _seen) = mpsc::unbounded_channel();
        let processor = Arc::new(Recorder {
            seen: tx,
            gate: Arc::new(Semaphore::new(0)),
        });
        let settings = QueueSettings {
            capacity: 1,
            ..QueueSettings::default()
        };
        let manager = QueueManager::new(processor, settings, cancel.clone());

        let producer = manager.clone();
        let intake = tokio::spawn(async move {
            for _ in 0..10 {
                producer.dispatch(msg(1, "hold")).await;
            }
        });
        sleep(Duration::from_secs(1)).await;
        assert!(!intake.is_finished());

        cancel.cancel();
        timeout(Duration::from_secs(1), intake)
            .await
            .expect("dispatch should give up on shutdown")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_for_queue_retired_after_lookup_goes_to_replacement() {
        let (manager, mut seen, _gate) = manager(CancellationToken::new());

        let stale = manager.get_or_create_queue("1").await;
        sleep(Duration::from_secs(11)).await;
        assert!(stale.is_retired());

        manager.deliver("1", &stale, msg(1, "late")).await;
        assert_eq!(seen.recv().await.unwrap().1, "late");

        let current = manager.get_or_create_queue("1").await;
        assert!(!Arc::ptr_eq(&stale, &current));
        assert!(!current.is_retired());
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retired_queue_is_replaced() {
        let (manager, mut seen, _gate) = manager(CancellationToken::new());

        manager.dispatch(msg(1, "first")).await;
        assert_eq!(seen.recv().await.unwrap().1, "first");
        let old = manager.get_or_create_queue("1").await;

        sleep(Duration::from_secs(11)).await;
        assert!(old.is_retired());

        manager.dispatch(msg(1, "second")).await;
        assert_eq!(seen.recv().await.unwrap().1, "second");

        let new = manager.get_or_create_queue("1").await;
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(!new.is_retired());
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_retired() {
        let (manager, _seen, _gate) = manager(CancellationToken::new());

        manager.get_or_create_queue("1").await;
        sleep(Duration::from_secs(6)).await;
        manager.get_or_create_queue("2").await;
        sleep(Duration::from_secs(6)).await;

        // "1" idled out, "2" has 4 seconds left.
        assert_eq!(manager.sweep().await, 1);
        assert_eq!(manager.len().await, 1);
        assert!(!manager.get_or_create_queue("2").await.is_retired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_retired_queue_until_worker_exits() {
        let (manager, mut seen, _gate) = manager(CancellationToken::new());

        let old = manager.get_or_create_queue("1").await;
        let slot = old.hold_handoff_slot().unwrap();
        sleep(Duration::from_secs(11)).await;
        assert!(old.is_retired());
        assert!(!old.is_finished());

        assert_eq!(manager.sweep().await, 0);
        assert_eq!(manager.len().await, 1);

        // The replacement must wait for the old worker.
        manager.dispatch(msg(1, "next")).await;
        assert!(timeout(Duration::from_millis(100), seen.recv()).await.is_err());

        drop(slot);
        assert_eq!(seen.recv().await.unwrap().1, "next");
        assert!(old.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_retired_queue_once_finished() {
        let (manager, _seen, _gate) = manager(CancellationToken::new());

        let old = manager.get_or_create_queue("1").await;
        let slot = old.hold_handoff_slot().unwrap();
        sleep(Duration::from_secs(11)).await;
        assert_eq!(manager.sweep().await, 0);

        drop(slot);
        sleep(Duration::from_millis(10)).await;
        assert!(old.is_finished());
        assert_eq!(manager.sweep().await, 1);
        assert!(manager.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_periodically() {
        let cancel = CancellationToken::new();
        let (manager, _seen, _gate) = manager(cancel.clone());
        let sweeper = manager.spawn_sweeper();

        manager.get_or_create_queue("1").await;
        sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.len().await, 1);

        sleep(Duration::from_secs(600)).await;
        assert!(manager.is_empty().await);

        cancel.cancel();
        sweeper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_retires_queues() {
        let cancel = CancellationToken::new();
        let (manager, _seen, _gate) = manager(cancel.clone());

        let queue = manager.get_or_create_queue("1").await;
        cancel.cancel();
        sleep(Duration::from_millis(10)).await;

        assert!(queue.is_retired());
        assert!(queue.is_finished());
    }
}
