//! InMemorySession - フィクスチャで動く PlatformSession
//!
//! # 学習ポイント
//! - `Arc<Mutex<_>>` で状態を共有し、テストから SessionProbe 経由で観測・操作する
//! - ロックは await を跨がない（std::sync::Mutex で十分）
//! - iter_messages は「新しい順・offset_date 以前・limit 件まで」の契約を守る

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ChannelRef;
use crate::error::SessionError;
use crate::ports::{Entity, MessageCursor, PlatformSession, RawMessage};

/// One channel known to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFixture {
    pub entity: Entity,
    /// Extra names the channel resolves from (invite links, old usernames).
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

impl ChannelFixture {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            aliases: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_message(mut self, message: RawMessage) -> Self {
        self.messages.push(message);
        self
    }

    fn matches_name(&self, name: &str) -> bool {
        let bare = name.trim_start_matches('@');
        self.entity
            .username
            .as_deref()
            .is_some_and(|username| username.eq_ignore_ascii_case(bare))
            || self.aliases.iter().any(|alias| alias == name)
    }

    fn matches(&self, channel: &ChannelRef) -> bool {
        match channel {
            ChannelRef::Id(id) => *id == self.entity.id,
            ChannelRef::Name(name) => self.matches_name(name),
        }
    }
}

/// JSON shape accepted by [`InMemorySession::from_json_str`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFixture {
    #[serde(default)]
    pub channels: Vec<ChannelFixture>,
}

#[derive(Debug, Default)]
struct SessionState {
    channels: Vec<ChannelFixture>,
    connected: bool,
    connect_calls: u64,
    disconnect_calls: u64,
    fail_connects: u32,
    hang_connects: u32,
    fail_ops: VecDeque<String>,
    op_delay: Duration,
    in_flight: u32,
    max_in_flight: u32,
    calls: Vec<String>,
    pulled: u64,
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    // テスト中に panic したスレッドがあっても状態は読めるようにする
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct InMemorySession {
    state: Arc<Mutex<SessionState>>,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: SessionFixture) -> Self {
        let session = Self::new();
        lock(&session.state).channels = fixture.channels;
        session
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_fixture(serde_json::from_str(json)?))
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw).map_err(std::io::Error::other)
    }

    pub fn with_channel(self, channel: ChannelFixture) -> Self {
        lock(&self.state).channels.push(channel);
        self
    }

    /// Every primitive sleeps this long, so overlapping calls would be observable.
    pub fn with_op_delay(self, delay: Duration) -> Self {
        lock(&self.state).op_delay = delay;
        self
    }

    /// A handle for observing and steering the session after it has been moved
    /// into the queue.
    pub fn probe(&self) -> SessionProbe {
        SessionProbe {
            state: Arc::clone(&self.state),
        }
    }

    async fn begin_op(&self, call: String) -> Result<(), SessionError> {
        let delay = {
            let mut state = lock(&self.state);
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.op_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.in_flight -= 1;
        if !state.connected {
            return Err(SessionError::NotConnected);
        }
        match state.fail_ops.pop_front() {
            Some(message) => Err(SessionError::Rpc(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformSession for InMemorySession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        let hang = {
            let mut state = lock(&self.state);
            state.connect_calls += 1;
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(SessionError::Rpc("connection refused".to_string()));
            }
            if state.hang_connects > 0 {
                state.hang_connects -= 1;
                true
            } else {
                state.connected = true;
                false
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        if state.connected {
            state.connected = false;
            state.disconnect_calls += 1;
        }
        Ok(())
    }

    async fn iter_messages(
        &mut self,
        channel: &ChannelRef,
        limit: usize,
        offset_date: DateTime<Utc>,
    ) -> Result<Box<dyn MessageCursor>, SessionError> {
        self.begin_op(format!("iter_messages({channel})")).await?;

        let state = lock(&self.state);
        let fixture = state
            .channels
            .iter()
            .find(|fixture| fixture.matches(channel))
            .ok_or_else(|| SessionError::EntityNotFound(channel.to_string()))?;

        let mut messages: Vec<RawMessage> = fixture
            .messages
            .iter()
            .filter(|message| message.date <= offset_date)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        messages.truncate(limit);

        Ok(Box::new(VecCursor {
            messages: messages.into(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn resolve_entity(&mut self, reference: &str) -> Result<Entity, SessionError> {
        self.begin_op(format!("resolve_entity({reference})")).await?;

        let state = lock(&self.state);
        state
            .channels
            .iter()
            .find(|fixture| fixture.matches_name(reference))
            .map(|fixture| fixture.entity.clone())
            .ok_or_else(|| SessionError::EntityNotFound(reference.to_string()))
    }
}

struct VecCursor {
    messages: VecDeque<RawMessage>,
    state: Arc<Mutex<SessionState>>,
}

#[async_trait]
impl MessageCursor for VecCursor {
    async fn next_message(&mut self) -> Result<Option<RawMessage>, SessionError> {
        let next = self.messages.pop_front();
        if next.is_some() {
            lock(&self.state).pulled += 1;
        }
        Ok(next)
    }
}

/// Observation and fault injection for an [`InMemorySession`].
#[derive(Debug, Clone)]
pub struct SessionProbe {
    state: Arc<Mutex<SessionState>>,
}

impl SessionProbe {
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn connect_calls(&self) -> u64 {
        lock(&self.state).connect_calls
    }

    pub fn disconnect_calls(&self) -> u64 {
        lock(&self.state).disconnect_calls
    }

    /// Simulate the remote side dropping the connection.
    pub fn drop_connection(&self) {
        lock(&self.state).connected = false;
    }

    pub fn fail_next_connects(&self, n: u32) {
        lock(&self.state).fail_connects = n;
    }

    /// The next `n` connect calls never complete.
    pub fn hang_next_connects(&self, n: u32) {
        lock(&self.state).hang_connects = n;
    }

    /// The next primitive call fails with `SessionError::Rpc(message)`.
    pub fn fail_next_op(&self, message: impl Into<String>) {
        lock(&self.state).fail_ops.push_back(message.into());
    }

    /// Primitive calls in the order they started.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Highest number of primitive calls ever running at the same time.
    pub fn max_in_flight(&self) -> u32 {
        lock(&self.state).max_in_flight
    }

    /// Messages handed out by cursors so far.
    pub fn pulled_messages(&self) -> u64 {
        lock(&self.state).pulled
    }
}
