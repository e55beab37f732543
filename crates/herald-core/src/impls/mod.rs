//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemorySession**: フィクスチャで動く PlatformSession（テスト・オフライン運用向け）

pub mod inmem_session;

pub use self::inmem_session::{ChannelFixture, InMemorySession, SessionFixture, SessionProbe};
