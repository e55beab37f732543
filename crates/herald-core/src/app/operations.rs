//! Operations - worker が実行する 2 つのプラットフォーム操作
//!
//! - 直近 24 時間のメッセージ取得（新しい順、最大 100 件）
//! - チャンネル ID の解決（broadcast / supergroup は `-100` を前置）

use chrono::Duration;
use tracing::info;

use crate::domain::{ChannelMessage, ChannelMessages, ChannelRef, ResolvedChannel};
use crate::error::HeraldError;
use crate::ports::{Clock, PlatformSession};

/// 1 回の取得で要求する最大件数
pub const MESSAGE_LIMIT: usize = 100;

pub fn message_window() -> Duration {
    Duration::hours(24)
}

/// Fetch the channel's messages from the last 24 hours, most recent first.
///
/// Relies on the cursor yielding messages in descending time order: iteration
/// stops at the first message at or before `now - 24h`. Messages without text
/// are skipped.
pub async fn fetch_recent_messages<S: PlatformSession>(
    session: &mut S,
    clock: &dyn Clock,
    channel: &ChannelRef,
) -> Result<ChannelMessages, HeraldError> {
    info!(%channel, "getting messages from last 24 hours");

    let now = clock.now();
    let cutoff = now - message_window();
    let mut result = ChannelMessages::empty(channel, now);

    let mut cursor = session.iter_messages(channel, MESSAGE_LIMIT, now).await?;
    while let Some(message) = cursor.next_message().await? {
        if message.date <= cutoff {
            break;
        }
        match message.text {
            Some(text) if !text.is_empty() => result.messages.push(ChannelMessage {
                id: message.id,
                text,
            }),
            _ => continue,
        }
    }

    Ok(result)
}

/// Resolve a username or invite link to its numeric id.
pub async fn resolve_channel_id<S: PlatformSession>(
    session: &mut S,
    channel: &str,
) -> Result<ResolvedChannel, HeraldError> {
    info!(channel, "getting channel id");

    let entity = session.resolve_entity(channel).await?;
    let channel_id = if entity.is_channel_like() {
        prefixed_channel_id(entity.id)?
    } else {
        entity.id
    };

    info!(channel, channel_id, "found channel id");
    Ok(ResolvedChannel {
        channel_id,
        username: entity.username,
    })
}

/// Prefix a raw channel id with `-100` (123 → -100123).
///
/// Done on the decimal digits so no leading digit is lost.
pub fn prefixed_channel_id(raw: i64) -> Result<i64, HeraldError> {
    format!("-100{}", raw.unsigned_abs())
        .parse()
        .map_err(|_| HeraldError::InvalidChannelId(raw.to_string()))
}
