//! Ports - 抽象化レイヤー
//!
//! 外部システム（メッセージングプラットフォームのクライアント、時計）への
//! インターフェースを trait として定義し、実装の詳細を隠蔽します。

pub mod clock;
pub mod session;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::session::{Entity, EntityKind, MessageCursor, PlatformSession, RawMessage};
