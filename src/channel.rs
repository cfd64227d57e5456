//! Ordered, multi-subscriber message channel.
//!
//! Topics carry a FIFO sequence of messages to every live subscriber
//! (broadcast semantics). There is no replay: a subscriber only sees
//! messages published after it subscribed, and a subscriber that falls too
//! far behind loses the overwritten messages (at-most-once delivery). The
//! scheduler never leans on delivery guarantees — every publish is paired
//! with an await-with-timeout on a result topic.

use crate::core::task::TaskId;
use crate::registry::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Per-topic buffer size. A lagged subscriber drops the oldest messages.
pub const TOPIC_CAPACITY: usize = 256;

/// A task handed to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDispatch {
    pub task_id: TaskId,
    pub description: String,
    pub context: serde_json::Value,
}

/// A worker's report for one dispatched task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

/// Messages carried on the channel.
#[derive(Debug, Clone)]
pub enum Message {
    /// Scheduler → worker: run this task.
    Dispatch(TaskDispatch),
    /// Worker → scheduler: the task's outcome.
    Result(TaskResult),
}

/// Topic a worker listens on for its dispatches.
pub fn worker_topic(worker_id: &WorkerId) -> String {
    format!("worker:{}:tasks", worker_id)
}

/// Topic the scheduler awaits for one task's result.
pub fn result_topic(task_id: &TaskId) -> String {
    format!("task:{}:result", task_id)
}

/// Topic-keyed broadcast channel.
///
/// Cheap to share behind an `Arc`; the lock only guards the topic map,
/// never message delivery.
pub struct MessageChannel {
    topics: Mutex<HashMap<String, broadcast::Sender<Message>>>,
}

impl MessageChannel {
    /// Create a channel with no topics.
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Message> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish a message to a topic.
    ///
    /// Returns the number of subscribers that received it; zero means the
    /// message was dropped (nobody was listening — by design, not an error).
    pub fn publish(&self, topic: &str, message: Message) -> usize {
        self.sender(topic).send(message).unwrap_or(0)
    }

    /// Subscribe to a topic.
    ///
    /// The subscription yields every message published after this call, in
    /// publish order for the topic.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        Subscription {
            rx: self.sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("topics", &self.topics.lock().unwrap().len())
            .finish()
    }
}

/// A lazy, awaitable sequence of messages for one topic.
pub struct Subscription {
    rx: broadcast::Receiver<Message>,
}

impl Subscription {
    /// Receive the next message.
    ///
    /// Messages lost to lag are skipped (at-most-once delivery). Returns
    /// `None` once the topic's channel is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt the subscription into a `futures` stream.
    pub fn into_stream(self) -> impl futures::Stream<Item = Message> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|message| (message, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn dispatch(task_id: TaskId) -> Message {
        Message::Dispatch(TaskDispatch {
            task_id,
            description: "do the thing".to_string(),
            context: serde_json::Value::Null,
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let channel = MessageChannel::new();
        let delivered = channel.publish("nowhere", dispatch(TaskId::new()));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_fifo_per_topic() {
        let channel = MessageChannel::new();
        let mut sub = channel.subscribe("t");

        let ids: Vec<TaskId> = (0..5).map(|_| TaskId::new()).collect();
        for id in &ids {
            channel.publish("t", dispatch(*id));
        }

        for expected in &ids {
            match sub.recv().await.unwrap() {
                Message::Dispatch(d) => assert_eq!(d.task_id, *expected),
                other => panic!("Expected Dispatch, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_multiple_subscribers() {
        let channel = MessageChannel::new();
        let mut a = channel.subscribe("t");
        let mut b = channel.subscribe("t");
        assert_eq!(channel.subscriber_count("t"), 2);

        let id = TaskId::new();
        let delivered = channel.publish("t", dispatch(id));
        assert_eq!(delivered, 2);

        for sub in [&mut a, &mut b] {
            match sub.recv().await.unwrap() {
                Message::Dispatch(d) => assert_eq!(d.task_id, id),
                other => panic!("Expected Dispatch, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_no_replay_of_history() {
        let channel = MessageChannel::new();
        channel.publish("t", dispatch(TaskId::new()));

        let mut late = channel.subscribe("t");
        let id = TaskId::new();
        channel.publish("t", dispatch(id));

        // The late subscriber only sees the second message.
        match late.recv().await.unwrap() {
            Message::Dispatch(d) => assert_eq!(d.task_id, id),
            other => panic!("Expected Dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let channel = MessageChannel::new();
        let mut a = channel.subscribe("a");
        let _b = channel.subscribe("b");

        let id = TaskId::new();
        channel.publish("a", dispatch(id));
        channel.publish("b", dispatch(TaskId::new()));

        match a.recv().await.unwrap() {
            Message::Dispatch(d) => assert_eq!(d.task_id, id),
            other => panic!("Expected Dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_into_stream() {
        let channel = MessageChannel::new();
        let sub = channel.subscribe("t");
        let id = TaskId::new();
        channel.publish("t", dispatch(id));

        let mut stream = Box::pin(sub.into_stream());
        match stream.next().await.unwrap() {
            Message::Dispatch(d) => assert_eq!(d.task_id, id),
            other => panic!("Expected Dispatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_lost_messages() {
        let channel = MessageChannel::new();
        let mut sub = channel.subscribe("t");

        // Overflow the topic buffer; the oldest messages are lost.
        let total = TOPIC_CAPACITY + 10;
        for _ in 0..total {
            channel.publish("t", dispatch(TaskId::new()));
        }

        // recv still yields the surviving messages instead of erroring.
        let mut received = 0;
        while received < TOPIC_CAPACITY {
            assert!(sub.recv().await.is_some());
            received += 1;
        }
    }
}
