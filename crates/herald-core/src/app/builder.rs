//! ScraperQueueBuilder - ScraperQueue の構築とワイヤリング
//!
//! # 使用例
//! ```ignore
//! let queue = ScraperQueueBuilder::new()
//!     .policy(ConnectionPolicy::new(Duration::from_secs(10), Duration::from_secs(5)))
//!     .try_build(session)?;
//! ```
//!
//! # Fail-fast 設計
//! - 0 秒の接続タイムアウトは「絶対に接続できない」設定なので起動時に弾く

use std::sync::Arc;
use std::time::Duration;

use super::connection::{ConnectionManager, ConnectionPolicy};
use super::scraper_queue::ScraperQueue;
use crate::ports::{Clock, PlatformSession, SystemClock};

/// BuildError は構築時のエラー
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("connect timeout must be greater than zero")]
    ZeroConnectTimeout,
}

pub struct ScraperQueueBuilder {
    policy: ConnectionPolicy,
    clock: Arc<dyn Clock>,
}

impl ScraperQueueBuilder {
    pub fn new() -> Self {
        Self {
            policy: ConnectionPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn policy(mut self, policy: ConnectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.policy.connect_timeout = timeout;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.policy.backoff = backoff;
        self
    }

    /// 24 時間ウィンドウの基準時刻を差し替える（テスト用）
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn try_build<S: PlatformSession>(self, session: S) -> Result<ScraperQueue<S>, BuildError> {
        if self.policy.connect_timeout.is_zero() {
            return Err(BuildError::ZeroConnectTimeout);
        }
        Ok(self.build(session))
    }

    /// Build without validating the policy.
    pub fn build<S: PlatformSession>(self, session: S) -> ScraperQueue<S> {
        let conn = ConnectionManager::new(session, self.policy);
        ScraperQueue::from_parts(conn, self.clock)
    }
}

impl Default for ScraperQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemorySession;

    #[test]
    fn zero_connect_timeout_is_rejected() {
        let built = ScraperQueueBuilder::new()
            .connect_timeout(Duration::ZERO)
            .try_build(InMemorySession::new());
        assert!(matches!(built, Err(BuildError::ZeroConnectTimeout)));
    }

    #[test]
    fn defaults_build() {
        let built = ScraperQueueBuilder::new()
            .backoff(Duration::from_secs(1))
            .try_build(InMemorySession::new());
        assert!(built.is_ok());
    }
}
