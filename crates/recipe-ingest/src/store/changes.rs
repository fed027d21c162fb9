//! Realtime job change feed.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::job::Job;

/// Broadcasts every persisted job change to all subscribers.
#[derive(Clone)]
pub struct JobChangeBroadcaster {
    sender: Arc<broadcast::Sender<Job>>,
}

impl JobChangeBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publishes a job to all subscribers.
    pub fn send(&self, job: Job) {
        // No active receivers is fine.
        let _ = self.sender.send(job);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobChangeBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
