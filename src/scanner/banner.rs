//! Banner capture on an already-open connection.
//!
//! The probe is protocol-agnostic: a bare HTTP `HEAD` line that web servers
//! answer and most other services simply ignore before sending their own
//! greeting. Decoding never fails; invalid UTF-8 is replaced.
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;

/// Line written before reading.
pub const PROBE_LINE: &[u8] = b"HEAD / HTTP/1.0\r\n\r\n";

/// Maximum number of bytes read from the service.
pub const READ_BUDGET: usize = 1024;

/// Maximum number of characters kept in a banner.
pub const DISPLAY_LENGTH: usize = 200;

/// How long to wait for the service to answer.
pub const BANNER_TIMEOUT: Duration = Duration::from_secs(3);

/// Sends the probe line, reads one response window and closes the stream.
///
/// The stream is consumed so it is always released when this returns,
/// whatever the outcome.
pub async fn grab<S>(mut stream: S, wait: Duration) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = stream.write_all(PROBE_LINE).await {
        debug!("Banner probe write failed: {e}");
    }

    let mut buf = vec![0u8; READ_BUDGET];
    let read = time::timeout(wait, stream.read(&mut buf)).await;

    if let Err(e) = stream.shutdown().await {
        debug!("Shutdown stream error {e}");
    }
    drop(stream);

    match read {
        Ok(Ok(size)) => {
            debug!("Received {size} banner bytes");
            decode(&buf[..size])
        }
        Ok(Err(e)) => {
            debug!("Banner read failed: {e}");
            None
        }
        Err(_) => None,
    }
}

/// Permissive decode: invalid sequences become U+FFFD, surrounding whitespace
/// is trimmed and the text is cut to [`DISPLAY_LENGTH`] characters. Empty input
/// means no banner.
pub fn decode(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    Some(text.chars().take(DISPLAY_LENGTH).collect())
}
