//! Bounded queue of the jobs currently surfaced to the user.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::job::{Job, JobSnapshot, JobStatus};
use crate::store::JobChangeBroadcaster;

use super::poller::PollEvent;

/// Error shown for a job the poller gave up on.
pub const NO_PROGRESS_MESSAGE: &str = "Import timed out: no progress";

/// Client-side projection of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    pub is_polling: bool,
}

impl QueueItem {
    /// A polled item mirroring `job`.
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
            title: job
                .metadata
                .get("recipe_title")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            cover_image: job
                .metadata
                .get("media_url")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            is_polling: !job.is_terminal(),
        }
    }

    /// Mirrors `snapshot` onto the item. A terminal item is final; later
    /// snapshots, which can only be stale, are ignored.
    fn apply_snapshot(&mut self, snapshot: &JobSnapshot) {
        if self.status.is_terminal() {
            return;
        }
        self.status = snapshot.status;
        self.progress = snapshot.progress;
        self.error = snapshot.error.clone();
        if snapshot.status.is_terminal() {
            self.is_polling = false;
        }
    }
}

/// Realtime listener for one job. Dropping it stops the listener.
struct Subscription {
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// At most `capacity` items in insertion order; adding past capacity evicts
/// the oldest.
///
/// With a change feed attached, every item gets a listener that forwards its
/// job's changes; [`ProcessingQueue::next_change`] and
/// [`ProcessingQueue::process_pending`] apply them.
pub struct ProcessingQueue {
    capacity: usize,
    items: VecDeque<QueueItem>,
    changes: Option<JobChangeBroadcaster>,
    subscriptions: HashMap<String, Subscription>,
    updates_tx: mpsc::UnboundedSender<Job>,
    updates_rx: mpsc::UnboundedReceiver<Job>,
}

impl ProcessingQueue {
    pub fn new(capacity: usize) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
            changes: None,
            subscriptions: HashMap::new(),
            updates_tx,
            updates_rx,
        }
    }

    pub fn with_realtime(capacity: usize, changes: JobChangeBroadcaster) -> Self {
        Self {
            changes: Some(changes),
            ..Self::new(capacity)
        }
    }

    pub fn from_config(config: &Config, changes: Option<JobChangeBroadcaster>) -> Self {
        match changes {
            Some(changes) => Self::with_realtime(config.queue.capacity, changes),
            None => Self::new(config.queue.capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_in_queue(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Items, oldest first.
    pub fn items(&self) -> Vec<QueueItem> {
        self.items.iter().cloned().collect()
    }

    pub fn has_subscription(&self, id: &str) -> bool {
        self.subscriptions.contains_key(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Adds `item` and returns the ids evicted to make room. Adding an id that
    /// is already queued does nothing.
    pub fn add(&mut self, item: QueueItem) -> Vec<String> {
        if self.is_in_queue(&item.id) {
            return Vec::new();
        }

        let id = item.id.clone();
        let terminal = item.status.is_terminal();
        self.items.push_back(item);
        if !terminal {
            self.attach(&id);
        }

        let mut evicted = Vec::new();
        while self.items.len() > self.capacity {
            if let Some(oldest) = self.items.pop_front() {
                self.detach(&oldest.id);
                debug!(job_id = %oldest.id, "Evicted from queue");
                evicted.push(oldest.id);
            }
        }
        evicted
    }

    pub fn remove(&mut self, id: &str) -> Option<QueueItem> {
        self.detach(id);
        let index = self.items.iter().position(|item| item.id == id)?;
        self.items.remove(index)
    }

    /// Applies a job change. Changes for untracked jobs are dropped along
    /// with their listener. Returns whether an item changed.
    pub fn apply_job_change(&mut self, job: &Job) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == job.id) else {
            self.detach(&job.id);
            return false;
        };
        if item.status.is_terminal() {
            self.detach(&job.id);
            return false;
        }

        let before = item.clone();
        item.apply_snapshot(&job.snapshot());
        if let Some(title) = job.metadata.get("recipe_title").and_then(|v| v.as_str()) {
            item.title = Some(title.to_string());
        }
        if let Some(cover) = job.metadata.get("media_url").and_then(|v| v.as_str()) {
            item.cover_image = Some(cover.to_string());
        }
        let changed = *item != before;

        if job.is_terminal() {
            self.detach(&job.id);
        }
        changed
    }

    /// Applies a poller notification. Returns whether an item changed.
    pub fn apply_poll_event(&mut self, event: &PollEvent) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == event.job_id()) else {
            return false;
        };
        if item.status.is_terminal() {
            return false;
        }

        match event {
            PollEvent::StatusChanged { snapshot, .. } => {
                let before = item.clone();
                item.apply_snapshot(snapshot);
                *item != before
            }
            PollEvent::FetchFailed {
                job_id,
                error,
                consecutive_errors,
            } => {
                debug!(job_id = %job_id, consecutive_errors, "Status fetch failed: {}", error);
                false
            }
            PollEvent::TimedOut { job_id, .. } => {
                item.status = JobStatus::Failed;
                item.progress = JobStatus::Failed.progress();
                item.error = Some(NO_PROGRESS_MESSAGE.to_string());
                item.is_polling = false;
                self.detach(job_id);
                true
            }
        }
    }

    /// Waits for the next realtime change and applies it. Returns the id of
    /// the job that changed, or `None` once every forwarded change has been
    /// applied and no listener is left.
    pub async fn next_change(&mut self) -> Option<String> {
        let job = match self.updates_rx.try_recv() {
            Ok(job) => job,
            Err(_) if self.subscriptions.is_empty() => return None,
            Err(_) => self.updates_rx.recv().await?,
        };
        self.apply_job_change(&job);
        Some(job.id)
    }

    /// Applies every realtime change that has already arrived.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(job) = self.updates_rx.try_recv() {
            if self.apply_job_change(&job) {
                applied += 1;
            }
        }
        applied
    }

    /// Drops every listener. Items stay.
    pub fn teardown(&mut self) {
        self.subscriptions.clear();
    }

    fn attach(&mut self, id: &str) {
        let Some(changes) = &self.changes else {
            return;
        };
        if self.subscriptions.contains_key(id) {
            return;
        }

        let mut rx = changes.subscribe();
        let tx = self.updates_tx.clone();
        let job_id = id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(job) if job.id == job_id => {
                        if tx.send(job).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(job_id = %job_id, "Realtime listener skipped {} changes", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.subscriptions.insert(id.to_string(), Subscription { task });
    }

    fn detach(&mut self, id: &str) {
        if self.subscriptions.remove(id).is_some() {
            debug!(job_id = %id, "Detached realtime listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> QueueItem {
        QueueItem {
            id: id.to_string(),
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            title: None,
            cover_image: None,
            is_polling: true,
        }
    }

    #[test]
    fn test_evicts_oldest_by_insertion() {
        let mut queue = ProcessingQueue::new(3);
        assert!(queue.add(item("a")).is_empty());
        queue.add(item("b"));
        queue.add(item("c"));

        let evicted = queue.add(item("d"));

        assert_eq!(evicted, vec!["a"]);
        assert!(!queue.is_in_queue("a"));
        let ids: Vec<String> = queue.items().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_add_existing_is_noop() {
        let mut queue = ProcessingQueue::new(2);
        queue.add(item("a"));
        queue.add(item("b"));

        assert!(queue.add(item("a")).is_empty());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.items()[0].id, "a");
    }

    #[test]
    fn test_remove() {
        let mut queue = ProcessingQueue::new(3);
        queue.add(item("a"));
        assert_eq!(queue.remove("a").unwrap().id, "a");
        assert!(queue.remove("a").is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_timeout_event_marks_failed() {
        let mut queue = ProcessingQueue::new(3);
        queue.add(item("a"));

        let changed = queue.apply_poll_event(&PollEvent::TimedOut {
            job_id: "a".to_string(),
            last_status: Some(JobStatus::Queued),
        });

        assert!(changed);
        let a = queue.get("a").unwrap();
        assert_eq!(a.status, JobStatus::Failed);
        assert_eq!(a.progress, 100);
        assert_eq!(a.error.as_deref(), Some(NO_PROGRESS_MESSAGE));
        assert!(!a.is_polling);
    }

    #[test]
    fn test_fetch_failure_changes_nothing() {
        let mut queue = ProcessingQueue::new(3);
        queue.add(item("a"));
        assert!(!queue.apply_poll_event(&PollEvent::FetchFailed {
            job_id: "a".to_string(),
            error: "offline".to_string(),
            consecutive_errors: 4,
        }));
        assert_eq!(queue.get("a").unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_from_job_reads_presentation_fields() {
        let mut job = Job::new("https://example.com/p/1");
        job.metadata
            .insert("recipe_title".to_string(), "Pho".into());
        job.metadata
            .insert("media_url".to_string(), "https://cdn/p.jpg".into());

        let item = QueueItem::from_job(&job);

        assert_eq!(item.title.as_deref(), Some("Pho"));
        assert_eq!(item.cover_image.as_deref(), Some("https://cdn/p.jpg"));
        assert!(item.is_polling);
    }

    #[tokio::test]
    async fn test_realtime_updates_and_detach() {
        let changes = JobChangeBroadcaster::default();
        let mut queue = ProcessingQueue::with_realtime(3, changes.clone());
        let mut job = Job::new("https://example.com/p/1");
        queue.add(QueueItem::from_job(&job));
        assert!(queue.has_subscription(&job.id));

        job.status = JobStatus::Scraping;
        job.progress = JobStatus::Scraping.progress();
        changes.send(Job::new("https://example.com/other"));
        changes.send(job.clone());

        assert_eq!(queue.next_change().await.as_deref(), Some(job.id.as_str()));
        assert_eq!(queue.get(&job.id).unwrap().progress, 15);

        queue.remove(&job.id);
        assert!(!queue.has_subscription(&job.id));
    }

    #[test]
    fn test_untracked_change_is_ignored() {
        let mut queue = ProcessingQueue::new(3);
        assert!(!queue.apply_job_change(&Job::new("https://example.com/p/9")));
        assert!(queue.is_empty());
    }

    fn snapshot(id: &str, status: JobStatus) -> JobSnapshot {
        JobSnapshot {
            id: id.to_string(),
            status,
            stage: status,
            progress: status.progress(),
            error: None,
            recipe_id: None,
        }
    }

    #[test]
    fn test_stale_poll_after_realtime_ready_is_ignored() {
        let mut queue = ProcessingQueue::new(3);
        let mut job = Job::new("https://example.com/p/1");
        queue.add(QueueItem::from_job(&job));
        job.status = JobStatus::Ready;
        job.progress = 100;
        job.recipe_id = Some("r1".to_string());
        assert!(queue.apply_job_change(&job));

        let changed = queue.apply_poll_event(&PollEvent::StatusChanged {
            job_id: job.id.clone(),
            snapshot: snapshot(&job.id, JobStatus::Scraping),
        });

        assert!(!changed);
        let item = queue.get(&job.id).unwrap();
        assert_eq!(item.status, JobStatus::Ready);
        assert_eq!(item.progress, 100);
        assert!(!item.is_polling);
    }

    #[test]
    fn test_late_changes_do_not_reopen_terminal_item() {
        let mut queue = ProcessingQueue::new(3);
        let mut job = Job::new("https://example.com/p/1");
        queue.add(QueueItem::from_job(&job));
        assert!(queue.apply_poll_event(&PollEvent::TimedOut {
            job_id: job.id.clone(),
            last_status: Some(JobStatus::Queued),
        }));

        job.status = JobStatus::Extracting;
        job.progress = JobStatus::Extracting.progress();
        assert!(!queue.apply_job_change(&job));
        assert!(!queue.apply_poll_event(&PollEvent::TimedOut {
            job_id: job.id.clone(),
            last_status: Some(JobStatus::Extracting),
        }));

        let item = queue.get(&job.id).unwrap();
        assert_eq!(item.status, JobStatus::Failed);
        assert_eq!(item.error.as_deref(), Some(NO_PROGRESS_MESSAGE));
    }

    #[tokio::test]
    async fn test_next_change_ends_without_listeners() {
        let mut plain = ProcessingQueue::new(3);
        plain.add(item("a"));
        assert_eq!(plain.next_change().await, None);

        let changes = JobChangeBroadcaster::default();
        let mut queue = ProcessingQueue::with_realtime(3, changes);
        queue.add(item("a"));
        queue.teardown();

        let next = tokio::time::timeout(std::time::Duration::from_secs(2), queue.next_change())
            .await
            .expect("next_change returned after teardown");
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_teardown_detaches_all() {
        let changes = JobChangeBroadcaster::default();
        let mut queue = ProcessingQueue::with_realtime(3, changes.clone());
        queue.add(item("a"));
        queue.add(item("b"));
        assert_eq!(queue.subscription_count(), 2);

        queue.teardown();

        assert_eq!(queue.subscription_count(), 0);
        assert_eq!(queue.len(), 2);
    }
}
