//! Durable funding job queue
//!
//! `enqueue` writes the job to a [`JobStore`] and returns. A single poller
//! task claims due jobs, at most `concurrency` at a time, and runs each on
//! its own task. A failed attempt is rescheduled with exponential backoff
//! until its last attempt, which the handler is told about.
//!
//! Claims expire after the visibility timeout, so a job whose worker died
//! mid-run is picked up again after a restart.

use async_trait::async_trait;
use cardvault_core::config::QueueConfig;
use cardvault_core::models::{Job, JobHandle, JobOptions, StoredJob, FUNDING_QUEUE};
use cardvault_core::traits::{JobHandler, JobQueue, JobStore};
use cardvault_core::{AppError, AppResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

pub struct DurableQueue {
    name: String,
    store: Arc<dyn JobStore>,
    concurrency: usize,
    poll_interval: Duration,
    visibility: Duration,
    started: AtomicBool,
}

impl DurableQueue {
    pub fn new(store: Arc<dyn JobStore>, config: &QueueConfig) -> Self {
        Self {
            name: FUNDING_QUEUE.to_string(),
            store,
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
            visibility: config.visibility_timeout(),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the poller. Only the first call succeeds.
    pub fn start(&self, handler: Arc<dyn JobHandler>) -> AppResult<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::Queue(format!(
                "Queue {} already started",
                self.name
            )));
        }

        let worker = Worker {
            queue: self.name.clone(),
            store: self.store.clone(),
            handler,
        };
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let poll_interval = self.poll_interval;
        let visibility = self.visibility;
        info!(queue = %self.name, concurrency = self.concurrency, "Job worker started");

        Ok(tokio::spawn(async move {
            loop {
                let free = permits.available_permits();
                if free == 0 {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }

                let claimed = match worker.store.claim(&worker.queue, free, visibility).await {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        warn!(queue = %worker.queue, error = %e, "Job claim failed");
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                };
                if claimed.is_empty() {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }

                for stored in claimed {
                    let Ok(permit) = permits.clone().acquire_owned().await else {
                        return;
                    };
                    let worker = worker.clone();
                    tokio::spawn(async move {
                        worker.run(stored).await;
                        drop(permit);
                    });
                }
            }
        }))
    }
}

#[derive(Clone)]
struct Worker {
    queue: String,
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
}

impl Worker {
    async fn run(&self, stored: StoredJob) {
        let ctx = stored.context();
        debug!(queue = %self.queue, job_id = %stored.id, attempt = ctx.attempt, "Running job");

        let bookkeeping = match self.handler.handle(&stored.job, &ctx).await {
            Ok(outcome) => {
                info!(
                    queue = %self.queue,
                    job_id = %stored.id,
                    job = %stored.job,
                    attempt = ctx.attempt,
                    rail_reference = outcome.rail_reference.as_deref().unwrap_or(""),
                    "Job completed"
                );
                self.store.complete(stored.id).await
            }
            Err(e) if ctx.is_final_attempt() => {
                error!(
                    queue = %self.queue,
                    job_id = %stored.id,
                    job = %stored.job,
                    attempts = ctx.attempt,
                    error = %e,
                    "Job failed permanently"
                );
                self.store.fail(stored.id, &e.to_string()).await
            }
            Err(e) => {
                let delay = RetryPolicy::exponential(stored.max_attempts, stored.backoff_base)
                    .delay_for(ctx.attempt);
                warn!(
                    queue = %self.queue,
                    job_id = %stored.id,
                    job = %stored.job,
                    attempt = ctx.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Job attempt failed, retrying"
                );
                self.store.retry_later(stored.id, delay, &e.to_string()).await
            }
        };

        // The claim expires and the job runs again
        if let Err(e) = bookkeeping {
            error!(queue = %self.queue, job_id = %stored.id, error = %e, "Job state not saved");
        }
    }
}

#[async_trait]
impl JobQueue for DurableQueue {
    async fn enqueue(&self, job: Job, options: JobOptions) -> AppResult<JobHandle> {
        self.store.insert(&self.name, &job, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, MemoryJobStore, StoredStatus};
    use cardvault_core::models::{EntryStatus, FundingJob, FundingRail, JobContext, JobOutcome};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
        attempts: Mutex<Vec<(u32, bool)>>,
        done: mpsc::UnboundedSender<u32>,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, job: &Job, ctx: &JobContext) -> AppResult<JobOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.attempts.lock().push((ctx.attempt, ctx.is_final_attempt()));

            let result = if ctx.attempt <= self.failures {
                Err(AppError::Wallet("rail unavailable".to_string()))
            } else {
                Ok(JobOutcome {
                    card_transaction_id: job.card_transaction_id(),
                    rail_reference: Some("tx_1".to_string()),
                })
            };
            if result.is_ok() || ctx.is_final_attempt() {
                let _ = self.done.send(ctx.attempt);
            }
            result
        }
    }

    fn config() -> QueueConfig {
        QueueConfig {
            concurrency: 2,
            attempts: 3,
            backoff_base_ms: 1,
            poll_interval_ms: 5,
            visibility_timeout_secs: 60,
        }
    }

    fn job() -> Job {
        Job::Funding(FundingJob {
            card_transaction_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            card_id: Uuid::new_v4(),
            amount: 1000,
            fee: 10,
            rail: FundingRail::Fiat,
        })
    }

    fn handler(failures: u32) -> (Arc<FlakyHandler>, mpsc::UnboundedReceiver<u32>) {
        let (done, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(FlakyHandler {
            failures,
            calls: AtomicU32::new(0),
            attempts: Mutex::new(Vec::new()),
            done,
        });
        (handler, rx)
    }

    fn options() -> JobOptions {
        JobOptions {
            attempts: 3,
            backoff_base: Duration::from_millis(1),
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let store = Arc::new(MemoryJobStore::default());
        let queue = DurableQueue::new(store.clone(), &config());
        let (handler, mut done) = handler(2);
        queue.start(handler.clone()).unwrap();

        let handle = queue.enqueue(job(), options()).await.unwrap();
        assert_eq!(handle.queue, FUNDING_QUEUE);

        let attempt = tokio::time::timeout(Duration::from_secs(5), done.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt, 3);
        assert_eq!(
            *handler.attempts.lock(),
            vec![(1, false), (2, false), (3, true)]
        );

        wait_for(|| store.status(handle.id) == Some(StoredStatus::Completed)).await;
    }

    #[tokio::test]
    async fn test_stops_after_final_attempt() {
        let store = Arc::new(MemoryJobStore::default());
        let queue = DurableQueue::new(store.clone(), &config());
        let (handler, mut done) = handler(10);
        queue.start(handler.clone()).unwrap();

        let handle = queue.enqueue(job(), options()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), done.recv())
            .await
            .unwrap()
            .unwrap();
        wait_for(|| store.status(handle.id) == Some(StoredStatus::Failed)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            store.last_error(handle.id).as_deref(),
            Some("Wallet service error: rail unavailable")
        );
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let queue = DurableQueue::new(Arc::new(MemoryJobStore::default()), &config());
        let (handler, _done) = handler(0);
        queue.start(handler.clone()).unwrap();

        assert!(matches!(queue.start(handler), Err(AppError::Queue(_))));
    }

    #[tokio::test]
    async fn test_enqueue_persists_before_any_worker() {
        let store = Arc::new(MemoryJobStore::default());
        let queue = DurableQueue::new(store.clone(), &config());

        let handle = queue.enqueue(job(), options()).await.unwrap();
        assert_eq!(store.status(handle.id), Some(StoredStatus::Queued));
    }

    #[tokio::test]
    async fn test_job_survives_worker_restart() {
        let store = Arc::new(MemoryJobStore::default());

        // First process: enqueued, claimed, then gone before finishing
        let first = DurableQueue::new(store.clone(), &config());
        let handle = first.enqueue(job(), options()).await.unwrap();
        let abandoned = store
            .claim(FUNDING_QUEUE, 1, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(abandoned.len(), 1);
        drop(first);

        let second = DurableQueue::new(store.clone(), &config());
        let (handler, mut done) = handler(0);
        second.start(handler.clone()).unwrap();

        let attempt = tokio::time::timeout(Duration::from_secs(5), done.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt, 2);
        wait_for(|| store.status(handle.id) == Some(StoredStatus::Completed)).await;
    }

    #[tokio::test]
    async fn test_funding_runs_through_queue_and_settles() {
        let h = Harness::new();
        h.fiat.set_balance(100_000);
        let card = h.seed_card(0);

        let store = Arc::new(MemoryJobStore::default());
        let queue = Arc::new(DurableQueue::new(store.clone(), &config()));
        let worker = queue.start(Arc::new(h.saga_handler())).unwrap();

        let receipt = h
            .funding_service_on(queue.clone())
            .request_funding(card.user_id, card.id, 5000, FundingRail::Fiat)
            .await
            .unwrap();
        assert_eq!(receipt.total, 5050);

        wait_for(|| store.status(receipt.job_id) == Some(StoredStatus::Completed)).await;
        worker.abort();

        let entry = h.store.entry(receipt.card_transaction_id);
        assert_eq!(entry.status, EntryStatus::Pending);
        let rail_reference = entry.rail_reference.clone();
        assert!(rail_reference.is_some());
        assert_eq!(h.fiat.transfers()[0].amount, 5050);

        let settled = h
            .funding_service()
            .complete_funding(receipt.card_transaction_id)
            .await
            .unwrap();
        assert_eq!(settled.entry().status, EntryStatus::Successful);
        assert_eq!(settled.entry().rail_reference, rail_reference);
        assert_eq!(h.store.card(card.id).balance, 5000);
    }
}
