use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{Message, transport::Sender};

/// In-memory sender for testing or local pipelines.
///
/// Messages are appended to a queue shared by every clone, so a test can keep
/// one handle and inspect what the pipeline delivered through another.
#[derive(Clone, Default)]
pub struct InMemory {
    queue: Arc<Mutex<Vec<Message>>>,
}

impl InMemory {
    /// Return all messages delivered so far and clear the queue.
    pub async fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.queue.lock().await)
    }

    /// Number of messages currently queued.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl Sender for InMemory {
    type Error = std::convert::Infallible;

    /// "Send" a message by appending it to the in-memory queue.
    #[tracing::instrument(skip_all)]
    async fn send(&mut self, message: Message) -> Result<(), Self::Error> {
        tracing::debug!(headers = ?message.headers, "Message queued in memory");
        self.queue.lock().await.push(message);
        Ok(())
    }
}
