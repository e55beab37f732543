//! ConnectionManager - 共有セッションの健全性を保証する
//!
//! # 状態遷移
//! - Disconnected →(接続成功)→ Connected
//! - Connected →(liveness probe 失敗)→ Disconnected
//! - Disconnected →(接続失敗 / タイムアウト)→ Disconnected（バックオフ後に再試行）
//!
//! 再試行ループ自体は WorkerLoop が回す。ここは 1 回分の試行と、その結果
//! （ConnectOutcome）を返すだけ。

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ConnectFailure, SessionError};
use crate::ports::PlatformSession;

/// Connection state. Only the manager mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    Connected,
}

/// Connect timeout and the fixed delay between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    pub connect_timeout: Duration,
    pub backoff: Duration,
}

impl ConnectionPolicy {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

    pub fn new(connect_timeout: Duration, backoff: Duration) -> Self {
        Self {
            connect_timeout,
            backoff,
        }
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CONNECT_TIMEOUT, Self::DEFAULT_BACKOFF)
    }
}

/// Result of [`ConnectionManager::ensure_connected`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The session is usable.
    Ready,
    /// The attempt failed; wait `delay` before trying again.
    /// Every connect failure lands here: none of them stops the worker.
    Backoff {
        failure: ConnectFailure,
        delay: Duration,
    },
}

/// Owns the platform session exclusively.
pub struct ConnectionManager<S> {
    session: S,
    state: ConnectionState,
    policy: ConnectionPolicy,
    attempts: u64,
}

impl<S: PlatformSession> ConnectionManager<S> {
    pub fn new(session: S, policy: ConnectionPolicy) -> Self {
        Self {
            session,
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
    }

    /// Number of connect attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// The live session. Callers go through [`ensure_connected`](Self::ensure_connected) first.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// 接続済みで probe も通れば即 Ready。そうでなければタイムアウト付きで 1 回接続を試みる。
    pub async fn ensure_connected(&mut self) -> ConnectOutcome {
        if self.state == ConnectionState::Connected {
            if self.session.is_connected().await {
                return ConnectOutcome::Ready;
            }
            self.state = ConnectionState::Disconnected;
        }

        warn!("platform client not connected, reconnecting");
        match self.connect_once().await {
            Ok(()) => {
                info!(attempt = self.attempts, "reconnection successful");
                ConnectOutcome::Ready
            }
            Err(failure) => {
                match &failure {
                    ConnectFailure::Timeout(after) => warn!(
                        attempt = self.attempts,
                        "reconnection timed out after {} seconds",
                        after.as_secs()
                    ),
                    ConnectFailure::Refused(err) => {
                        warn!(attempt = self.attempts, "reconnection failed: {err}")
                    }
                }
                ConnectOutcome::Backoff {
                    failure,
                    delay: self.policy.backoff,
                }
            }
        }
    }

    async fn connect_once(&mut self) -> Result<(), ConnectFailure> {
        self.state = ConnectionState::Connecting;
        self.attempts += 1;

        let result =
            match tokio::time::timeout(self.policy.connect_timeout, self.session.connect()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(ConnectFailure::Refused(err)),
                Err(_) => Err(ConnectFailure::Timeout(self.policy.connect_timeout)),
            };

        self.state = if result.is_ok() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        result
    }

    /// Tear the session down. Safe to call in any state.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        if self.state == ConnectionState::Disconnected && !self.session.is_connected().await {
            return Ok(());
        }
        self.state = ConnectionState::Disconnected;
        self.session.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemorySession;
    use tokio::time::Instant;

    fn manager(session: InMemorySession) -> ConnectionManager<InMemorySession> {
        ConnectionManager::new(session, ConnectionPolicy::default())
    }

    #[tokio::test]
    async fn connects_from_disconnected() {
        let session = InMemorySession::new();
        let probe = session.probe();
        let mut conn = manager(session);

        assert_eq!(conn.ensure_connected().await, ConnectOutcome::Ready);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(probe.is_connected());
        assert_eq!(probe.connect_calls(), 1);
    }

    #[tokio::test]
    async fn live_connection_is_not_reconnected() {
        let session = InMemorySession::new();
        let probe = session.probe();
        let mut conn = manager(session);

        conn.ensure_connected().await;
        conn.ensure_connected().await;
        assert_eq!(probe.connect_calls(), 1);
    }

    #[tokio::test]
    async fn failed_probe_triggers_a_reconnect() {
        let session = InMemorySession::new();
        let probe = session.probe();
        let mut conn = manager(session);

        conn.ensure_connected().await;
        probe.drop_connection();

        assert_eq!(conn.ensure_connected().await, ConnectOutcome::Ready);
        assert_eq!(probe.connect_calls(), 2);
    }

    #[tokio::test]
    async fn refused_connect_asks_for_backoff() {
        let session = InMemorySession::new();
        let probe = session.probe();
        probe.fail_next_connects(1);
        let mut conn = manager(session);

        let outcome = conn.ensure_connected().await;
        let ConnectOutcome::Backoff { failure, delay } = outcome else {
            panic!("expected backoff, got {outcome:?}");
        };
        assert!(matches!(failure, ConnectFailure::Refused(_)));
        assert_eq!(delay, Duration::from_secs(5));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_connect_is_bounded_by_the_timeout() {
        let session = InMemorySession::new();
        let probe = session.probe();
        probe.hang_next_connects(1);
        let mut conn = manager(session);

        let started = Instant::now();
        let outcome = conn.ensure_connected().await;
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(
            outcome,
            ConnectOutcome::Backoff {
                failure: ConnectFailure::Timeout(Duration::from_secs(10)),
                delay: Duration::from_secs(5),
            }
        );

        assert_eq!(conn.ensure_connected().await, ConnectOutcome::Ready);
        assert_eq!(conn.attempts(), 2);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let session = InMemorySession::new();
        let probe = session.probe();
        let mut conn = manager(session);

        conn.disconnect().await.unwrap();
        assert_eq!(probe.disconnect_calls(), 0);

        conn.ensure_connected().await;
        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(probe.disconnect_calls(), 1);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
