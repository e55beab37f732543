//! ScraperQueue - 単一セッションへの要求を直列化する公開 API
//!
//! # 使用例
//! ```ignore
//! let queue = ScraperQueue::new(session);
//! queue.start().await?;
//! let messages = queue.fetch_recent_messages_by_name("@news".into()).await?;
//! queue.stop().await;
//! ```
//!
//! # 所有権
//! - 停止中: ConnectionManager は `idle` に置かれる
//! - 稼働中: worker タスクが所有し、終了時に JoinHandle 経由で返してくる
//!
//! プロセス起動時に 1 つ作り、`Arc` で各ハンドラへ渡す（グローバル状態にはしない）。

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::builder::ScraperQueueBuilder;
use super::connection::{ConnectOutcome, ConnectionManager};
use super::worker_loop::WorkerLoop;
use crate::domain::{ChannelMessages, ResolvedChannel};
use crate::error::HeraldError;
use crate::observability::{QueueStats, StatsRecorder};
use crate::ports::{Clock, PlatformSession};
use crate::queue::{self, PendingResult, Request, Response, Task, TaskQueue};

struct RunningWorker<S> {
    queue: TaskQueue,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<ConnectionManager<S>>,
}

struct QueueState<S> {
    idle: Option<ConnectionManager<S>>,
    running: Option<RunningWorker<S>>,
}

pub struct ScraperQueue<S> {
    state: Mutex<QueueState<S>>,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsRecorder>,
}

impl<S: PlatformSession> ScraperQueue<S> {
    /// Queue with the default policy (10s connect timeout, 5s backoff) and the system clock.
    pub fn new(session: S) -> Self {
        ScraperQueueBuilder::new().build(session)
    }

    pub(crate) fn from_parts(conn: ConnectionManager<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                idle: Some(conn),
                running: None,
            }),
            clock,
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    /// Connect and launch the worker. No-op when it is already running.
    ///
    /// A failed first connect is logged, not returned: the worker keeps retrying.
    pub async fn start(&self) -> Result<(), HeraldError> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut QueueState<S>) -> Result<(), HeraldError> {
        if let Some(running) = &state.running {
            if !running.join.is_finished() {
                return Ok(());
            }
            // worker が勝手に終わっている（panic など）。回収してから起動し直す
            if let Some(running) = state.running.take() {
                match running.join.await {
                    Ok(conn) => state.idle = Some(conn),
                    Err(err) => error!(error = %err, "worker task ended unexpectedly"),
                }
            }
        }

        let Some(mut conn) = state.idle.take() else {
            return Err(HeraldError::Shutdown);
        };

        let initial_backoff = match conn.ensure_connected().await {
            ConnectOutcome::Ready => None,
            ConnectOutcome::Backoff { failure, delay } => {
                warn!(%failure, "initial connect failed, worker will keep retrying");
                Some(delay)
            }
        };
        self.stats.record_connect_attempts(conn.attempts());

        let (queue, receiver) = queue::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = WorkerLoop::new(
            conn,
            receiver,
            Arc::clone(&self.clock),
            Arc::clone(&self.stats),
            shutdown_rx,
        )
        .with_initial_backoff(initial_backoff);
        state.running = Some(RunningWorker {
            queue,
            shutdown_tx,
            join: tokio::spawn(worker.run()),
        });

        info!("scraper queue started");
        Ok(())
    }

    /// Stop the worker. No-op when it is not running.
    ///
    /// A task already executing finishes normally; tasks still queued are
    /// resolved with [`HeraldError::Shutdown`]. The session is disconnected.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.running.take() else {
            return;
        };

        // ignore send error: the worker may already be gone
        let _ = running.shutdown_tx.send(true);
        drop(running.queue);

        match running.join.await {
            Ok(conn) => state.idle = Some(conn),
            Err(err) => error!(error = %err, "worker task ended unexpectedly"),
        }
        info!("scraper queue stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .running
            .as_ref()
            .is_some_and(|running| !running.join.is_finished())
    }

    /// Enqueue a request and return its pending result right away.
    ///
    /// Starts the worker first if it is not running.
    pub async fn submit(&self, request: Request) -> PendingResult<Response> {
        let (task, pending) = Task::new(request);
        let mut state = self.state.lock().await;

        if let Err(err) = self.start_locked(&mut state).await {
            task.resolve(Err(err));
            self.stats.rejected(1);
            return pending;
        }

        self.stats.submitted();
        debug!(task_id = %task.id(), request = %task.request(), "task queued");
        match &state.running {
            Some(running) => {
                if running.queue.push(task).is_err() {
                    self.stats.rejected(1);
                }
            }
            None => {
                task.reject_shutdown();
                self.stats.rejected(1);
            }
        }
        pending
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.snapshot()
    }

    pub async fn fetch_recent_messages_by_id(
        &self,
        channel_id: i64,
    ) -> Result<ChannelMessages, HeraldError> {
        self.submit(Request::FetchById { channel_id })
            .await
            .narrow(into_messages)
            .await
    }

    pub async fn fetch_recent_messages_by_name(
        &self,
        channel_name: String,
    ) -> Result<ChannelMessages, HeraldError> {
        self.submit(Request::FetchByName { channel_name })
            .await
            .narrow(into_messages)
            .await
    }

    pub async fn resolve_channel_id(&self, channel: String) -> Result<ResolvedChannel, HeraldError> {
        self.submit(Request::ResolveChannel { channel })
            .await
            .narrow(into_channel)
            .await
    }
}

fn into_messages(response: Response) -> Result<ChannelMessages, HeraldError> {
    match response {
        Response::Messages(messages) => Ok(messages),
        Response::Channel(_) => Err(HeraldError::UnexpectedResponse),
    }
}

fn into_channel(response: Response) -> Result<ResolvedChannel, HeraldError> {
    match response {
        Response::Channel(channel) => Ok(channel),
        Response::Messages(_) => Err(HeraldError::UnexpectedResponse),
    }
}
