//! MI wire framing
//!
//! Every MI frame is exactly one line:
//! ```text
//! <token>-<command>\n        (to the debugger)
//! <token>^done,<results>\n   (from the debugger)
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// Longest line we accept before treating the stream as corrupt
const MAX_LINE: usize = 64 * 1024 * 1024;

/// Read one line from the debugger
///
/// Returns `Ok(None)` at end of stream. Invalid UTF-8 is replaced rather
/// than rejected so a single bad byte cannot stall the reader.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_LINE {
        return Err(Error::Internal(format!("MI line too long: {} bytes", buf.len())));
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Write a token-correlated command as one line
pub async fn write_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    token: u64,
    command: &str,
) -> Result<()> {
    write_raw(writer, &format!("{token}-{command}")).await
}

/// Write one raw line
///
/// The text must not contain a newline: a split line would be read as two
/// frames by the debugger.
pub async fn write_raw<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<()> {
    if text.contains('\n') {
        return Err(Error::Internal(format!(
            "refusing to send multi-line MI command: {text:?}"
        )));
    }
    let mut line = String::with_capacity(text.len() + 1);
    line.push_str(text);
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
