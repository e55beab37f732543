//! Queue - タスクキュー
//!
//! 多数のプロデューサーから単一の worker へタスクを渡す、FIFO の無制限キュー。
//!
//! # 設計
//! - Request は閉じた enum（FetchById / FetchByName / ResolveChannel）。worker 側は網羅的 match で実行する
//! - Task は Request + 一度だけ解決される返信スロット（oneshot）
//! - 挿入順 = 実行順 = 解決順（worker は 1 つなので）
//! - 停止時に残っているタスクは Shutdown で解決する（未解決のまま放置しない）

mod pending;

pub use pending::PendingResult;

use std::fmt;

use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::domain::{ChannelMessages, ChannelRef, ResolvedChannel};
use crate::error::HeraldError;

/// Which platform primitive to run, with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    FetchById { channel_id: i64 },
    FetchByName { channel_name: String },
    ResolveChannel { channel: String },
}

impl Request {
    pub fn selector(&self) -> &'static str {
        match self {
            Request::FetchById { .. } => "fetch_by_id",
            Request::FetchByName { .. } => "fetch_by_name",
            Request::ResolveChannel { .. } => "resolve_channel",
        }
    }

    /// The channel the request targets, for logging.
    pub fn channel(&self) -> ChannelRef {
        match self {
            Request::FetchById { channel_id } => ChannelRef::Id(*channel_id),
            Request::FetchByName { channel_name } => ChannelRef::Name(channel_name.clone()),
            Request::ResolveChannel { channel } => ChannelRef::Name(channel.clone()),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.selector(), self.channel())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Messages(ChannelMessages),
    Channel(ResolvedChannel),
}

pub(crate) type Reply = oneshot::Sender<Result<Response, HeraldError>>;

/// A queued operation and the slot its submitter waits on.
pub struct Task {
    id: Ulid,
    request: Request,
    reply: Reply,
}

impl Task {
    pub fn new(request: Request) -> (Self, PendingResult<Response>) {
        let (reply, rx) = oneshot::channel();
        let task = Self {
            id: Ulid::new(),
            request,
            reply,
        };
        (task, PendingResult::new(rx))
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Resolve the pending result. Consumes the task, so it can happen only once.
    ///
    /// Returns `false` when the submitter has already gone away.
    pub fn resolve(self, result: Result<Response, HeraldError>) -> bool {
        self.reply.send(result).is_ok()
    }

    pub fn reject_shutdown(self) -> bool {
        self.resolve(Err(HeraldError::Shutdown))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("request", &self.request)
            .finish()
    }
}

/// プロデューサー側（clone して共有できる）
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

/// 単一コンシューマー側（worker が所有する）
#[derive(Debug)]
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<Task>,
}

pub fn channel() -> (TaskQueue, TaskReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TaskQueue { tx }, TaskReceiver { rx })
}

impl TaskQueue {
    /// Append a task. If the consumer is gone the task is resolved with `Shutdown`.
    pub fn push(&self, task: Task) -> Result<(), HeraldError> {
        self.tx.send(task).map_err(|mpsc::error::SendError(task)| {
            task.reject_shutdown();
            HeraldError::Shutdown
        })
    }
}

impl TaskReceiver {
    /// Wait for the next task. `None` once every producer has been dropped.
    pub async fn next(&mut self) -> Option<Task> {
        self.rx.recv().await
    }

    /// Close the queue and resolve everything still in it with `Shutdown`.
    ///
    /// Pushes racing with the close either land before it (and are drained
    /// here) or fail and are rejected by [`TaskQueue::push`].
    pub fn close_and_drain(&mut self) -> usize {
        self.rx.close();
        let mut drained = 0;
        while let Ok(task) = self.rx.try_recv() {
            task.reject_shutdown();
            drained += 1;
        }
        drained
    }
}
