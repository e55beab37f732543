//! Channel - チャンネル参照とメッセージの形
//!
//! HTTP 層が返す JSON の形をそのまま serde で表現する。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// チャンネルの指し方（数値 ID / username・招待リンク）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelRef {
    Id(i64),
    Name(String),
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Id(id) => id.fmt(f),
            ChannelRef::Name(name) => name.fmt(f),
        }
    }
}

impl From<i64> for ChannelRef {
    fn from(id: i64) -> Self {
        ChannelRef::Id(id)
    }
}

impl From<String> for ChannelRef {
    fn from(name: String) -> Self {
        ChannelRef::Name(name)
    }
}

impl From<&str> for ChannelRef {
    fn from(name: &str) -> Self {
        ChannelRef::Name(name.to_string())
    }
}

/// A single message kept in a [`ChannelMessages`] result. `text` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    /// The channel reference exactly as the caller gave it.
    pub channel_id: String,
    /// Snapshot time captured when the fetch started.
    pub date: DateTime<Utc>,
}

/// Recent messages of one channel, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessages {
    pub meta: ChannelMeta,
    pub messages: Vec<ChannelMessage>,
}

impl ChannelMessages {
    pub fn empty(channel: &ChannelRef, date: DateTime<Utc>) -> Self {
        Self {
            meta: ChannelMeta {
                channel_id: channel.to_string(),
                date,
            },
            messages: Vec::new(),
        }
    }
}

/// 解決済みチャンネル ID（broadcast / supergroup は `-100` 付き）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedChannel {
    pub channel_id: i64,
    pub username: Option<String>,
}
