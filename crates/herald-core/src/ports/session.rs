//! PlatformSession port - メッセージングプラットフォームのセッション
//!
//! コアが依存するのは 5 つのプリミティブだけ:
//! connect / is_connected / disconnect / iter_messages / resolve_entity。
//! この集合を満たすクライアントなら差し替え可能。
//!
//! # 並行性
//! セッションは並行呼び出しに対して安全ではない前提。
//! そのため全メソッドは `&mut self` を取り、所有者（ConnectionManager）だけが触れる。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ChannelRef;
use crate::error::SessionError;

/// A message as the platform returns it. `text` may be absent (media-only posts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: i64,
    #[serde(default)]
    pub text: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Chat,
    Broadcast,
    Supergroup,
}

/// The platform's resolved representation of a channel or user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub kind: EntityKind,
}

impl Entity {
    /// broadcast channel / supergroup は `-100` 付きの ID を使う
    pub fn is_channel_like(&self) -> bool {
        matches!(self.kind, EntityKind::Broadcast | EntityKind::Supergroup)
    }
}

/// Lazy, time-descending sequence of messages produced by [`PlatformSession::iter_messages`].
///
/// Consumers may stop pulling at any point; the remaining messages are never fetched.
#[async_trait]
pub trait MessageCursor: Send {
    async fn next_message(&mut self) -> Result<Option<RawMessage>, SessionError>;
}

#[async_trait]
pub trait PlatformSession: Send + Sync + 'static {
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Liveness probe.
    async fn is_connected(&self) -> bool;

    /// Tear the session down. Calling it on a disconnected session is a no-op.
    async fn disconnect(&mut self) -> Result<(), SessionError>;

    /// Iterate at most `limit` messages of `channel`, starting at `offset_date`
    /// and walking backwards in time.
    async fn iter_messages(
        &mut self,
        channel: &ChannelRef,
        limit: usize,
        offset_date: DateTime<Utc>,
    ) -> Result<Box<dyn MessageCursor>, SessionError>;

    async fn resolve_entity(&mut self, reference: &str) -> Result<Entity, SessionError>;
}
