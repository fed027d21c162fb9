//! Client side of the progress protocol: a per-job poller and the bounded
//! queue it reports into.

pub mod poller;
pub mod queue;

pub use poller::{JobFetcher, PollDecision, PollEvent, PollState, PollerConfig, ProgressPoller};
pub use queue::{ProcessingQueue, QueueItem, NO_PROGRESS_MESSAGE};
