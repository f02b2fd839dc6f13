//! Forwarding of upstream tokens to the broker
//!
//! The upstream producer writes newline-terminated tokens (`start` or
//! `(x,y)`). They are published unchanged; this module never interprets them.

use crate::error::ClientResult;
use crate::session::MqttSession;
use crate::transport::Connector;
use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Counters for one forwarding run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwardStats {
    pub lines_read: u64,
    pub published: u64,
    /// Blank lines
    pub skipped: u64,
    /// Publishes that returned an error
    pub failed: u64,
}

/// Strip ASCII whitespace (including `\r\n`) from both ends
fn trim_token(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(start, |index| index + 1);
    &line[start..end]
}

/// Publish every token read from `reader` until end of input
///
/// Publish failures are counted and logged; the loop keeps going so a
/// reconnecting session only loses the tokens produced while it was down.
/// A read error ends the run.
pub async fn forward_lines<R, C>(
    mut reader: R,
    session: &MqttSession<C>,
    topic: Option<&str>,
) -> ClientResult<ForwardStats>
where
    R: AsyncBufRead + Unpin,
    C: Connector,
{
    let mut stats = ForwardStats::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        stats.lines_read += 1;

        let token = trim_token(&line);
        if token.is_empty() {
            stats.skipped += 1;
            continue;
        }

        match session.publish(topic, Bytes::copy_from_slice(token)).await {
            Ok(receipt) => {
                debug!(topic = %receipt.topic, token = %String::from_utf8_lossy(token), "Forwarded token");
                stats.published += 1;
            }
            Err(e) => {
                warn!(error = %e, token = %String::from_utf8_lossy(token), "Failed to forward token");
                stats.failed += 1;
            }
        }
    }

    info!(
        lines_read = stats.lines_read,
        published = stats.published,
        skipped = stats.skipped,
        failed = stats.failed,
        "Upstream reached end of input"
    );
    Ok(stats)
}
