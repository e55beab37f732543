//! Errors - エラー型と分類
//!
//! 接続レベルの失敗（ConnectFailure）は worker 内で吸収され、呼び出し元には届かない。
//! タスクレベルの失敗（Upstream / Shutdown）はそのタスクの PendingResult にだけ届く。

use std::time::Duration;

use thiserror::Error;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（接続系。worker がバックオフして再試行する）
/// - Permanent: 恒久的なエラー（リトライしても結果は変わらない）
/// - Shutdown: キュー停止によって実行されなかった
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Shutdown,
}

/// Errors raised by a [`PlatformSession`](crate::ports::PlatformSession) primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,

    #[error("cannot find any entity corresponding to \"{0}\"")]
    EntityNotFound(String),

    #[error("{0}")]
    Rpc(String),
}

/// 接続試行の失敗理由
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFailure {
    #[error("connect timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("connect failed: {0}")]
    Refused(SessionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeraldError {
    #[error(transparent)]
    Connect(#[from] ConnectFailure),

    #[error(transparent)]
    Upstream(#[from] SessionError),

    #[error("queue was stopped before the task could run")]
    Shutdown,

    #[error("channel id cannot be normalized: {0}")]
    InvalidChannelId(String),

    #[error("worker replied with a response of the wrong kind")]
    UnexpectedResponse,
}

impl HeraldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeraldError::Connect(_) => ErrorKind::Transient,
            HeraldError::Upstream(_)
            | HeraldError::InvalidChannelId(_)
            | HeraldError::UnexpectedResponse => ErrorKind::Permanent,
            HeraldError::Shutdown => ErrorKind::Shutdown,
        }
    }
}
