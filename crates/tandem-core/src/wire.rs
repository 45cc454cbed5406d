//! Reading and writing frames on an async byte stream.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{FAULT_SENTINEL, HEADER_LEN, parse_method_name};
use crate::{Frame, FrameError, TransportError};

/// Read exactly one frame.
///
/// The stream ending cleanly before a frame starts yields
/// [`TransportError::Closed`]; ending inside a frame yields
/// [`TransportError::UnexpectedEof`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Err(TransportError::Closed);
    }
    read_exact(reader, &mut header[first..]).await?;

    let message_id = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let method_len = u16::from_le_bytes([header[4], header[5]]) as usize;

    let method_name = if method_len > 0 {
        let mut raw = vec![0u8; method_len];
        read_exact(reader, &mut raw).await?;
        Some(parse_method_name(raw)?)
    } else {
        None
    };

    let mut count = [0u8; 1];
    read_exact(reader, &mut count).await?;
    let fault = count[0] == FAULT_SENTINEL;
    let count = if fault { 0 } else { count[0] as usize };

    tracing::trace!(
        message_id,
        method = method_name.as_deref(),
        argument_count = count,
        fault,
        "read frame header"
    );

    let mut arguments = Vec::with_capacity(count);
    for index in 0..count {
        let mut len = [0u8; 2];
        read_exact(reader, &mut len).await?;
        let len = u16::from_le_bytes(len) as usize;
        if len == 0 {
            tracing::warn!(message_id, index, "zero-length argument payload");
            return Err(FrameError::EmptyArgument.into());
        }
        let mut payload = vec![0u8; len];
        read_exact(reader, &mut payload).await?;
        arguments.push(Bytes::from(payload));
    }

    Ok(Frame::from_parts(message_id, method_name, fault, arguments))
}

/// Write an already encoded frame and flush it.
pub async fn write_frame<W>(writer: &mut W, encoded: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(encoded).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(TransportError::UnexpectedEof)
        }
        Err(e) => Err(TransportError::Io(e)),
    }
}
