//! App - アプリケーション層
//!
//! ports を組み合わせて、単一セッションへの直列実行を実装します。
//!
//! # 主要コンポーネント
//! - **ConnectionManager**: セッションの接続保証と再接続（タイムアウト + 固定バックオフ）
//! - **WorkerLoop**: 唯一のコンシューマー。1 件ずつ取り出して実行する
//! - **ScraperQueue**: start / stop / submit と、3 つの公開操作
//! - **ScraperQueueBuilder**: ポリシーと時計の差し替え
//! - **operations**: 24 時間ウィンドウ取得と ID 正規化

pub mod builder;
pub mod connection;
pub mod operations;
pub mod scraper_queue;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ScraperQueueBuilder};
pub use self::connection::{ConnectOutcome, ConnectionManager, ConnectionPolicy, ConnectionState};
pub use self::scraper_queue::ScraperQueue;
pub use self::worker_loop::WorkerLoop;
