//! Fixed-interval polling of a backend task until it reaches a terminal state.
//!
//! A [`Poller`] issues one status request per tick and only schedules the next
//! tick after the previous response has been handled, so there is never more
//! than one request in flight for a task. Every update is pushed to the
//! consumer over a channel. Cancelling the poller's token stops the pending
//! timer, and a response that lands after cancellation is dropped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{future, stream, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::TaskBackend;
use crate::error::ApiError;
use crate::models::{FinishedTask, RunningStatus, TaskStatus};
use crate::progress::{self, Kind};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    Running(RunningStatus),
    Done(FinishedTask),
    NotFound {
        task_id: String,
        detail: Option<String>,
    },
    Failed {
        task_id: String,
        status: Option<u16>,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Done,
    NotFound,
    Failed,
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("task id must not be empty")]
    EmptyTaskId,
    #[error("poll interval must be positive")]
    ZeroInterval,
}

pub struct Poller {
    backend: Arc<dyn TaskBackend>,
    task_id: String,
    interval: Duration,
    token: CancellationToken,
}

impl Poller {
    pub fn new(
        backend: Arc<dyn TaskBackend>,
        task_id: impl Into<String>,
        interval: Duration,
    ) -> Result<Self, PollError> {
        let task_id = task_id.into();
        if task_id.trim().is_empty() {
            return Err(PollError::EmptyTaskId);
        }
        if interval.is_zero() {
            return Err(PollError::ZeroInterval);
        }
        Ok(Poller {
            backend,
            task_id,
            interval,
            token: CancellationToken::new(),
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Handle used to stop this poller from the outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn run(self, updates: mpsc::UnboundedSender<PollUpdate>) -> PollOutcome {
        let mut tick: u64 = 0;
        loop {
            if self.token.is_cancelled() {
                return PollOutcome::Cancelled;
            }
            tick += 1;
            debug!(task_id = %self.task_id, tick, "polling task status");
            let result = self.backend.task_status(&self.task_id).await;

            if self.token.is_cancelled() {
                debug!(task_id = %self.task_id, "discarding response after cancellation");
                return PollOutcome::Cancelled;
            }

            let (update, outcome) = match result {
                Ok(TaskStatus::InProgress(status)) => {
                    progress::log_with(Kind::Poll, status.progress.message.clone());
                    (PollUpdate::Running(status), None)
                }
                Ok(TaskStatus::Done(finished)) => {
                    info!(task_id = %self.task_id, drafts = finished.iterations.len(), "task finished");
                    progress::log_with(Kind::Poll, format!("task {} finished", self.task_id));
                    (PollUpdate::Done(finished), Some(PollOutcome::Done))
                }
                Err(ApiError::NotFound { detail }) => {
                    warn!(task_id = %self.task_id, "task not found");
                    progress::log_with(Kind::Error, format!("task {} not found", self.task_id));
                    let update = PollUpdate::NotFound {
                        task_id: self.task_id.clone(),
                        detail,
                    };
                    (update, Some(PollOutcome::NotFound))
                }
                Err(e) => {
                    warn!(
                        task_id = %self.task_id,
                        status = ?e.status(),
                        detail = e.detail().unwrap_or_default(),
                        "status request failed"
                    );
                    progress::log_with(Kind::Error, e.to_string());
                    let update = PollUpdate::Failed {
                        task_id: self.task_id.clone(),
                        status: e.status(),
                        message: e.to_string(),
                    };
                    (update, Some(PollOutcome::Failed))
                }
            };

            if updates.send(update).is_err() {
                // Nobody is listening any more.
                return PollOutcome::Cancelled;
            }
            if let Some(outcome) = outcome {
                return outcome;
            }

            tokio::select! {
                _ = self.token.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Drives the poll loop as a stream of updates that ends with the loop.
    pub fn into_stream(self) -> impl Stream<Item = PollUpdate> + Send + 'static {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = stream::once(self.run(tx)).filter_map(|_| future::ready(None::<PollUpdate>));
        let updates = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|u| (u, rx)) });
        stream::select(updates, driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{self, HistoryStore, MemoryHistoryStore};
    use crate::models::{CreatedTask, Iteration, TaskProgress};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    /// Replays canned responses and remembers when each request was made.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<Result<TaskStatus, ApiError>>>,
        requests: Mutex<Vec<Instant>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<TaskStatus, ApiError>>) -> Arc<Self> {
            Arc::new(ScriptedBackend {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_times(&self) -> Vec<Instant> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskBackend for ScriptedBackend {
        async fn create_task(&self, query: &str) -> Result<CreatedTask, ApiError> {
            Ok(CreatedTask {
                task_id: "t".to_string(),
                query: Some(query.to_string()),
            })
        }

        async fn task_status(&self, _task_id: &str) -> Result<TaskStatus, ApiError> {
            self.requests.lock().unwrap().push(Instant::now());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(running()))
        }
    }

    /// Holds every status request open until `release` is notified.
    #[derive(Default)]
    struct BlockingBackend {
        release: Notify,
        requests: AtomicUsize,
    }

    #[async_trait]
    impl TaskBackend for BlockingBackend {
        async fn create_task(&self, _query: &str) -> Result<CreatedTask, ApiError> {
            Err(ApiError::NotFound { detail: None })
        }

        async fn task_status(&self, _task_id: &str) -> Result<TaskStatus, ApiError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(done())
        }
    }

    fn running() -> TaskStatus {
        TaskStatus::InProgress(RunningStatus {
            task_id: "task-1".to_string(),
            query: Some("q".to_string()),
            progress: TaskProgress::parse("1718000000:Searching"),
            estimated_time: Some("~2 minutes".to_string()),
            iterations: Vec::new(),
        })
    }

    fn done() -> TaskStatus {
        TaskStatus::Done(FinishedTask {
            task_id: "task-1".to_string(),
            query: Some("q".to_string()),
            iterations: vec![Iteration {
                text: "answer".to_string(),
                feedback: None,
                citations: Vec::new(),
            }],
        })
    }

    /// Feeds every update to the history store the way the app does.
    fn record_all(store: &dyn HistoryStore, updates: &[PollUpdate]) {
        for update in updates {
            history::apply_poll_update(store, update, "q", chrono::Utc::now()).unwrap();
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<PollUpdate>) -> Vec<PollUpdate> {
        let mut out = Vec::new();
        while let Some(update) = rx.recv().await {
            out.push(update);
        }
        out
    }

    #[test]
    fn rejects_empty_task_id_and_zero_interval() {
        let backend = ScriptedBackend::new(Vec::new());
        assert_eq!(
            Poller::new(backend.clone(), "  ", DEFAULT_INTERVAL).err(),
            Some(PollError::EmptyTaskId)
        );
        assert_eq!(
            Poller::new(backend, "t", Duration::ZERO).err(),
            Some(PollError::ZeroInterval)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_done_at_fixed_interval() {
        let backend = ScriptedBackend::new(vec![Ok(running()), Ok(running()), Ok(done())]);
        let poller = Poller::new(backend.clone(), "task-1", DEFAULT_INTERVAL).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let outcome = poller.run(tx).await;
        assert_eq!(outcome, PollOutcome::Done);

        let updates = drain(rx).await;
        assert_eq!(updates.len(), 3);
        assert!(matches!(updates[2], PollUpdate::Done(_)));

        let times = backend.request_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], DEFAULT_INTERVAL);
        assert_eq!(times[2] - times[1], DEFAULT_INTERVAL);

        // Nothing else fires after the terminal response.
        tokio::time::advance(DEFAULT_INTERVAL * 5).await;
        assert_eq!(backend.request_times().len(), 3);

        let store = MemoryHistoryStore::default();
        record_all(&store, &updates);
        record_all(&store, &updates);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_stops_after_one_request_without_history() {
        let backend = ScriptedBackend::new(vec![Err(ApiError::NotFound {
            detail: Some("Referenced task task-1 does not exist.".to_string()),
        })]);
        let poller = Poller::new(backend.clone(), "task-1", DEFAULT_INTERVAL).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        assert_eq!(poller.run(tx).await, PollOutcome::NotFound);
        tokio::time::advance(DEFAULT_INTERVAL * 3).await;
        assert_eq!(backend.request_times().len(), 1);

        let updates = drain(rx).await;
        assert!(matches!(updates.as_slice(), [PollUpdate::NotFound { .. }]));

        let store = MemoryHistoryStore::default();
        record_all(&store, &updates);
        assert_eq!(store.writes(), 0);
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn http_failure_is_surfaced_not_retried() {
        let backend = ScriptedBackend::new(vec![Err(ApiError::Http {
            status: 500,
            detail: Some("Referenced task task-1 failed.".to_string()),
        })]);
        let poller = Poller::new(backend.clone(), "task-1", DEFAULT_INTERVAL).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        assert_eq!(poller.run(tx).await, PollOutcome::Failed);
        assert_eq!(backend.request_times().len(), 1);
        match drain(rx).await.as_slice() {
            [PollUpdate::Failed { status, message, .. }] => {
                assert_eq!(*status, Some(500));
                assert!(message.contains("Referenced task task-1 failed."));
            }
            other => panic!("unexpected updates {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_before_the_timer_fires_prevents_the_next_request() {
        let backend = ScriptedBackend::new(vec![Ok(running()), Ok(done())]);
        let poller = Poller::new(backend.clone(), "task-1", DEFAULT_INTERVAL).unwrap();
        let token = poller.cancellation_token();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(poller.run(tx));
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, PollUpdate::Running(_)));

        token.cancel();
        tokio::time::advance(DEFAULT_INTERVAL * 2).await;

        assert_eq!(handle.await.unwrap(), PollOutcome::Cancelled);
        assert_eq!(backend.request_times().len(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn response_arriving_after_cancel_is_dropped() {
        let backend = Arc::new(BlockingBackend::default());
        let poller = Poller::new(backend.clone(), "task-1", DEFAULT_INTERVAL).unwrap();
        let token = poller.cancellation_token();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(poller.run(tx));
        while backend.requests.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        token.cancel();
        backend.release.notify_one();

        assert_eq!(handle.await.unwrap(), PollOutcome::Cancelled);
        assert_eq!(backend.requests.load(Ordering::SeqCst), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_yields_updates_then_ends() {
        let backend = ScriptedBackend::new(vec![Ok(running()), Ok(done())]);
        let poller = Poller::new(backend.clone(), "task-1", DEFAULT_INTERVAL).unwrap();

        let updates: Vec<PollUpdate> = poller.into_stream().collect().await;
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0], PollUpdate::Running(_)));
        assert!(matches!(updates[1], PollUpdate::Done(_)));
        assert_eq!(backend.request_times().len(), 2);
    }
}
