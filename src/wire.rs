//! Framing primitives: read-exact, discard-n, write-exact over a mini-header
//! framed stream. Every steady-state SPICE frame in both directions is
//! `SpiceMiniDataHeader{type,size}` followed by exactly `size` payload bytes.

use crate::error::{Result, SpiceError};
use crate::protocol::SpiceMiniDataHeader;
use crate::transport::Transport;
use binrw::{BinRead, BinWrite};
use std::io::Cursor;

/// Read exactly `buf.len()` bytes, or fail. EOF before any data is read maps
/// to `NoData`-shaped `ConnectionClosed`; EOF mid-frame is a protocol error.
pub async fn read_exact(transport: &mut dyn Transport, buf: &mut [u8]) -> Result<()> {
    let mut total = 0;
    while total < buf.len() {
        let n = transport.read(&mut buf[total..]).await.map_err(SpiceError::Io)?;
        if n == 0 {
            return if total == 0 {
                Err(SpiceError::ConnectionClosed)
            } else {
                Err(SpiceError::Protocol(
                    "connection closed mid-frame".to_string(),
                ))
            };
        }
        total += n;
    }
    Ok(())
}

/// Read and discard `n` bytes via a small stack buffer.
pub async fn discard_n(transport: &mut dyn Transport, mut n: usize) -> Result<()> {
    let mut scratch = [0u8; 256];
    while n > 0 {
        let chunk = n.min(scratch.len());
        read_exact(transport, &mut scratch[..chunk]).await?;
        n -= chunk;
    }
    Ok(())
}

/// Read one mini-header-framed message: `(msg_type, payload)`.
pub async fn read_message(transport: &mut dyn Transport) -> Result<(u16, Vec<u8>)> {
    let mut header_buf = [0u8; 6];
    read_exact(transport, &mut header_buf).await?;
    let mut cursor = Cursor::new(&header_buf[..]);
    let header = SpiceMiniDataHeader::read(&mut cursor)
        .map_err(|e| SpiceError::Protocol(format!("bad mini header: {e}")))?;

    let mut payload = vec![0u8; header.size as usize];
    read_exact(transport, &mut payload).await?;
    Ok((header.msg_type, payload))
}

/// Write one mini-header-framed message as a single `write_all`, matching the
/// "build then send once" invariant from the Design Notes.
pub async fn write_message(transport: &mut dyn Transport, msg_type: u16, payload: &[u8]) -> Result<()> {
    let frame = MessageBuilder::new(msg_type).body(payload).finish();
    transport.write_all(&frame).await.map_err(SpiceError::Io)?;
    transport.flush().await.map_err(SpiceError::Io)
}

/// Builds one owned, ready-to-send mini-header-framed buffer.
///
/// Replaces the macro-based reserved-prefix packet allocation of the
/// original design: the header's size field is back-patched once the full
/// body length is known, and the whole thing is handed to a single `write_all`.
pub struct MessageBuilder {
    msg_type: u16,
    body: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(msg_type: u16) -> Self {
        Self {
            msg_type,
            body: Vec::new(),
        }
    }

    pub fn body(mut self, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(bytes);
        self
    }

    pub fn push<T: BinWrite>(mut self, value: &T) -> Self
    where
        T::Args<'static>: Default,
    {
        let mut encoded = Vec::new();
        let mut cursor = Cursor::new(&mut encoded);
        // Safe to ignore: our structs are fixed-size primitives that never fail to encode.
        let _ = value.write_le(&mut cursor);
        self.body.extend_from_slice(&encoded);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let header = SpiceMiniDataHeader {
            msg_type: self.msg_type,
            size: self.body.len() as u32,
        };
        let mut out = Vec::with_capacity(6 + self.body.len());
        let mut cursor = Cursor::new(&mut out);
        header.write(&mut cursor).expect("mini header always encodes");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Encode a buffer for a fixed-size `binrw` struct alone (no mini header);
/// used for the link-stage structures which aren't mini-header framed.
pub fn encode<T: BinWrite>(value: &T) -> Result<Vec<u8>>
where
    T::Args<'static>: Default,
{
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    value
        .write_le(&mut cursor)
        .map_err(|e| SpiceError::Protocol(format!("encode failed: {e}")))?;
    Ok(buf)
}

pub fn decode<T: for<'a> BinRead<Args<'a> = ()>>(buf: &[u8]) -> Result<T> {
    let mut cursor = Cursor::new(buf);
    T::read_le(&mut cursor).map_err(|e| SpiceError::Protocol(format!("decode failed: {e}")))
}
