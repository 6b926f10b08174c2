//! Native messaging framing
//!
//! Each message is a `u32` little-endian byte length followed by that many
//! bytes of UTF-8 JSON, in both directions. The extension marks requests it
//! relays from a web page with `"origin": "external"`.

use std::io;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use watchparty_core::bridge::{BridgeResponse, BridgeStorage, ExtensionBridge, MessageOrigin};

/// Largest frame accepted from the browser
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Read one frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one frame and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Pull the relay marker off a request. Unmarked requests come from the
/// extension; an unrecognised marker is treated as a web page.
fn take_origin(value: &mut Value) -> MessageOrigin {
    let Some(marker) = value.as_object_mut().and_then(|fields| fields.remove("origin")) else {
        return MessageOrigin::Internal;
    };
    serde_json::from_value(marker).unwrap_or(MessageOrigin::External)
}

/// Answer requests until the reader closes
pub async fn serve<S, R, W>(bridge: &ExtensionBridge<S>, reader: &mut R, writer: &mut W) -> io::Result<()>
where
    S: BridgeStorage,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut handled = 0usize;
    while let Some(body) = read_frame(reader).await? {
        let response = match serde_json::from_slice::<Value>(&body) {
            Ok(mut value) => {
                let origin = take_origin(&mut value);
                bridge.handle_value(value, origin)
            }
            Err(e) => {
                warn!("Unreadable frame: {}", e);
                BridgeResponse::error(format!("Invalid JSON: {}", e))
            }
        };
        write_frame(writer, &serde_json::to_vec(&response)?).await?;
        handled += 1;
    }
    debug!("Input closed after {} messages", handled);
    Ok(())
}
