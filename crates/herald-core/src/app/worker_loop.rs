//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 0. start() の接続が失敗していたら、まずバックオフ分待つ
//! 1. ConnectionManager::ensure_connected()（失敗したらバックオフして 1 に戻る）
//! 2. TaskReceiver::next() で 1 件取り出す（空なら待つ）
//! 3. 実行直前にもう一度接続を確認
//! 4. Request を網羅的 match で実行し、PendingResult を解決
//!
//! shutdown は「待ち」（接続・バックオフ・次タスク）だけを中断する。
//! 実行中のタスクは最後まで走らせ、呼び出し元には本物の結果を返す。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::connection::{ConnectOutcome, ConnectionManager};
use super::operations;
use crate::error::HeraldError;
use crate::observability::StatsRecorder;
use crate::ports::{Clock, PlatformSession};
use crate::queue::{Request, Response, Task, TaskReceiver};

/// The single consumer of the task queue. Owns the connection while it runs and
/// hands it back when it exits.
pub struct WorkerLoop<S> {
    conn: ConnectionManager<S>,
    receiver: TaskReceiver,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsRecorder>,
    shutdown_rx: watch::Receiver<bool>,
    initial_backoff: Option<Duration>,
}

/// Resolves once shutdown has been requested or the sender is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    // Err はセンダーが drop された場合。どちらにしても止まる
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

impl<S: PlatformSession> WorkerLoop<S> {
    pub(crate) fn new(
        conn: ConnectionManager<S>,
        receiver: TaskReceiver,
        clock: Arc<dyn Clock>,
        stats: Arc<StatsRecorder>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            conn,
            receiver,
            clock,
            stats,
            shutdown_rx,
            initial_backoff: None,
        }
    }

    /// Wait `delay` before the first connect attempt.
    ///
    /// Used when the caller's own connect attempt has just failed, so the
    /// backoff between consecutive attempts also holds across the hand-off.
    pub(crate) fn with_initial_backoff(mut self, delay: Option<Duration>) -> Self {
        self.initial_backoff = delay;
        self
    }

    pub async fn run(mut self) -> ConnectionManager<S> {
        debug!("worker started");
        let proceed = match self.initial_backoff.take() {
            Some(delay) => self.back_off(delay).await,
            None => true,
        };
        if proceed {
            self.serve().await;
        }

        let drained = self.receiver.close_and_drain();
        if drained > 0 {
            warn!(drained, "rejected queued tasks on shutdown");
        }
        self.stats.rejected(drained);

        if let Err(err) = self.conn.disconnect().await {
            warn!(error = %err, "disconnect failed");
        }
        debug!("worker stopped");
        self.conn
    }

    async fn serve(&mut self) {
        loop {
            if !self.wait_until_connected().await {
                return;
            }

            // shutdown を優先: 停止要求後にキューに残っているものは実行しない
            let task = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown_rx) => return,
                task = self.receiver.next() => task,
            };
            let Some(task) = task else {
                return;
            };

            // 待機中に切れている可能性があるので、実行直前に確認する
            if !self.wait_until_connected().await {
                task.reject_shutdown();
                self.stats.rejected(1);
                return;
            }

            self.execute(task).await;
        }
    }

    /// Returns `false` if shutdown was requested before `delay` elapsed.
    async fn back_off(&mut self, delay: Duration) -> bool {
        debug!(?delay, "backing off");
        tokio::select! {
            _ = shutdown_requested(&mut self.shutdown_rx) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Retry connecting with a fixed backoff until it works.
    ///
    /// Returns `false` if shutdown was requested first.
    async fn wait_until_connected(&mut self) -> bool {
        loop {
            let outcome = tokio::select! {
                _ = shutdown_requested(&mut self.shutdown_rx) => return false,
                outcome = self.conn.ensure_connected() => outcome,
            };
            self.stats.record_connect_attempts(self.conn.attempts());

            match outcome {
                ConnectOutcome::Ready => return true,
                ConnectOutcome::Backoff { failure, delay } => {
                    debug!(%failure, "connect attempt failed");
                    if !self.back_off(delay).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn execute(&mut self, task: Task) {
        let span = info_span!(
            "task",
            task_id = %task.id(),
            selector = task.request().selector()
        );

        async {
            let result = self.dispatch(task.request()).await;
            match &result {
                Ok(_) => info!("task finished"),
                Err(err) => error!(error = %err, "error processing task"),
            }
            self.stats.finished(result.is_ok());

            if !task.resolve(result) {
                debug!("submitter went away before the result arrived");
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&mut self, request: &Request) -> Result<Response, HeraldError> {
        let session = self.conn.session_mut();
        match request {
            Request::FetchById { .. } | Request::FetchByName { .. } => {
                operations::fetch_recent_messages(session, self.clock.as_ref(), &request.channel())
                    .await
                    .map(Response::Messages)
            }
            Request::ResolveChannel { channel } => operations::resolve_channel_id(session, channel)
                .await
                .map(Response::Channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::connection::ConnectionPolicy;
    use crate::impls::{ChannelFixture, InMemorySession, SessionProbe};
    use crate::ports::{Entity, EntityKind, SystemClock};
    use crate::queue::{self, TaskQueue};
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    struct Harness {
        queue: TaskQueue,
        shutdown_tx: watch::Sender<bool>,
        join: JoinHandle<ConnectionManager<InMemorySession>>,
        probe: SessionProbe,
        stats: Arc<StatsRecorder>,
    }

    fn spawn(session: InMemorySession) -> Harness {
        spawn_after(session, None)
    }

    fn spawn_after(session: InMemorySession, initial_backoff: Option<Duration>) -> Harness {
        let probe = session.probe();
        let (queue, receiver) = queue::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(StatsRecorder::default());
        let worker = WorkerLoop::new(
            ConnectionManager::new(session, ConnectionPolicy::default()),
            receiver,
            Arc::new(SystemClock),
            Arc::clone(&stats),
            shutdown_rx,
        )
        .with_initial_backoff(initial_backoff);
        Harness {
            queue,
            shutdown_tx,
            join: tokio::spawn(worker.run()),
            probe,
            stats,
        }
    }

    fn session() -> InMemorySession {
        InMemorySession::new().with_channel(ChannelFixture::new(Entity {
            id: 10,
            username: Some("ten".to_string()),
            kind: EntityKind::User,
        }))
    }

    fn resolve(channel: &str) -> Request {
        Request::ResolveChannel {
            channel: channel.to_string(),
        }
    }

    #[tokio::test]
    async fn a_failing_task_does_not_stop_the_worker() {
        let h = spawn(session());

        let (bad, bad_result) = Task::new(resolve("@missing"));
        let (good, good_result) = Task::new(resolve("ten"));
        h.queue.push(bad).unwrap();
        h.queue.push(good).unwrap();

        assert!(matches!(bad_result.await, Err(HeraldError::Upstream(_))));
        assert!(matches!(good_result.await, Ok(Response::Channel(_))));

        let stats = h.stats.snapshot();
        assert_eq!((stats.succeeded, stats.failed), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_retrying_with_backoff_until_connected() {
        let h = spawn(session());
        h.probe.hang_next_connects(1);
        h.probe.fail_next_connects(1);

        let started = Instant::now();
        let (task, result) = Task::new(resolve("ten"));
        h.queue.push(task).unwrap();
        assert!(result.await.is_ok());

        // refused (+5s), then hung until the 10s timeout (+5s), then success
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(h.probe.connect_calls(), 3);
        assert_eq!(h.stats.snapshot().connect_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_backoff_delays_the_first_connect() {
        let h = spawn_after(session(), Some(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(h.probe.connect_calls(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.probe.connect_calls(), 1);
        assert!(h.probe.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_the_initial_backoff_skips_connecting() {
        let h = spawn_after(session(), Some(Duration::from_secs(5)));
        let (task, result) = Task::new(resolve("ten"));
        h.queue.push(task).unwrap();

        h.shutdown_tx.send(true).unwrap();
        let conn = h.join.await.unwrap();
        assert_eq!(result.await, Err(HeraldError::Shutdown));
        assert_eq!(conn.attempts(), 0);
        assert_eq!(h.stats.snapshot().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_the_backoff_wait() {
        let h = spawn(session());
        h.probe.fail_next_connects(u32::MAX);

        let (task, result) = Task::new(resolve("ten"));
        h.queue.push(task).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.shutdown_tx.send(true).unwrap();
        let conn = h.join.await.unwrap();
        assert_eq!(result.await, Err(HeraldError::Shutdown));
        assert!(conn.attempts() >= 1);
    }

    #[tokio::test]
    async fn dropped_connection_is_restored_before_the_next_task() {
        let h = spawn(session());

        let (first, first_result) = Task::new(resolve("ten"));
        h.queue.push(first).unwrap();
        first_result.await.unwrap();

        h.probe.drop_connection();
        let (second, second_result) = Task::new(resolve("ten"));
        h.queue.push(second).unwrap();
        second_result.await.unwrap();

        assert_eq!(h.probe.connect_calls(), 2);
    }

    #[tokio::test]
    async fn exit_disconnects_and_returns_the_connection() {
        let h = spawn(session());
        let (task, result) = Task::new(resolve("ten"));
        h.queue.push(task).unwrap();
        result.await.unwrap();

        h.shutdown_tx.send(true).unwrap();
        let conn = h.join.await.unwrap();
        assert!(!h.probe.is_connected());
        assert_eq!(h.probe.disconnect_calls(), 1);
        assert_eq!(conn.attempts(), 1);
    }
}
