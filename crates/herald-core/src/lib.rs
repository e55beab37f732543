//! herald-core
//!
//! 単一の認証済みセッションを、多数の同時呼び出し元で共有するためのコア。
//!
//! # モジュール構成
//! - **domain**: チャンネル参照・メッセージ・解決済み ID
//! - **ports**: 抽象化レイヤー（PlatformSession, Clock）
//! - **queue**: タスクキュー（Request, Task, PendingResult）
//! - **app**: ConnectionManager, WorkerLoop, ScraperQueue
//! - **impls**: 実装（InMemorySession）
//! - **observability**: キューのカウンター
//! - **error**: エラー型と分類

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{ConnectionPolicy, ScraperQueue, ScraperQueueBuilder};
pub use error::{ErrorKind, HeraldError};
