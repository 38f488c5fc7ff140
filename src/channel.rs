//! Per-channel link handshake and the channel-agnostic common message
//! dispatch: ack-window accounting, ping/pong, notify, disconnect, migrate.

use crate::auth::encrypt_password;
use crate::error::{DispatchOutcome, Result, SpiceError};
use crate::protocol::*;
use crate::transport::{create_transport, Endpoint, ReadHalf, Transport, WriteHalf};
use crate::wire::{self, MessageBuilder};
use binrw::{BinRead, BinWrite};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared, per-channel bookkeeping referenced by both the channel's read task
/// and any task sending on its write half.
pub struct ChannelState {
    pub connected: AtomicBool,
    pub ready: AtomicBool,
    pub init_done: AtomicBool,
    pub ack_frequency: AtomicU32,
    pub ack_count: AtomicU32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            init_done: AtomicBool::new(false),
            ack_frequency: AtomicU32::new(0),
            ack_count: AtomicU32::new(0),
        }
    }
}

/// Result of a successful link: a dedicated read half for the channel's
/// background task, and a shared, lockable write half for everyone else.
pub struct LinkedChannel {
    pub read_half: ReadHalf,
    pub write_half: Arc<Mutex<WriteHalf>>,
    pub state: Arc<ChannelState>,
}

/// Runs the link handshake to completion and returns the split,
/// ready-to-use channel. Blocking in spirit: this is `.await`ed fully before
/// the channel is registered with anything else.
pub async fn link_channel(
    endpoint: &Endpoint,
    channel_type: ChannelType,
    connection_id: u32,
    password: &str,
    channel_caps: &[u32],
) -> Result<LinkedChannel> {
    let mut socket = create_transport(endpoint).await?;

    let common_caps = [CAP_COMMON_AUTH_SELECTION, CAP_COMMON_AUTH_SPICE, CAP_COMMON_MINI_HEADER];
    let common_caps_word = encode_caps(&common_caps);
    let channel_caps_word = encode_caps(channel_caps);

    let mess = SpiceLinkMess {
        connection_id,
        channel_type: channel_type as u8,
        channel_id: 0,
        num_common_caps: 1,
        num_channel_caps: 1,
        caps_offset: 18, // sizeof(SpiceLinkMess)
    };
    let mut body = wire::encode(&mess)?;
    body.extend_from_slice(&common_caps_word.to_le_bytes());
    body.extend_from_slice(&channel_caps_word.to_le_bytes());

    let header = SpiceLinkHeader {
        magic: SPICE_MAGIC,
        major_version: SPICE_VERSION_MAJOR,
        minor_version: SPICE_VERSION_MINOR,
        size: body.len() as u32,
    };
    let mut outgoing = wire::encode(&header)?;
    outgoing.extend_from_slice(&body);
    socket.write_all(&outgoing).await.map_err(SpiceError::Io)?;
    socket.flush().await.map_err(SpiceError::Io)?;

    let mut reply_header_buf = [0u8; 16];
    wire::read_exact(&mut socket, &mut reply_header_buf).await?;
    let reply_header = SpiceLinkHeader::read_le(&mut Cursor::new(&reply_header_buf[..]))
        .map_err(|e| SpiceError::Protocol(format!("bad link reply header: {e}")))?;

    if reply_header.magic != SPICE_MAGIC {
        return Err(SpiceError::Protocol(format!(
            "bad link magic: {:#x}",
            reply_header.magic
        )));
    }
    if reply_header.major_version != SPICE_VERSION_MAJOR {
        return Err(SpiceError::VersionMismatch {
            expected: SPICE_VERSION_MAJOR,
            actual: reply_header.major_version,
        });
    }

    let mut reply_body = vec![0u8; reply_header.size as usize];
    wire::read_exact(&mut socket, &mut reply_body).await?;
    if reply_body.len() < 174 {
        return Err(SpiceError::Protocol("link reply too short".to_string()));
    }
    let reply = SpiceLinkReplyData {
        error: u32::from_le_bytes(reply_body[0..4].try_into().unwrap()),
        pub_key: reply_body[4..166].to_vec(),
        num_common_caps: u32::from_le_bytes(reply_body[166..170].try_into().unwrap()),
        num_channel_caps: u32::from_le_bytes(reply_body[170..174].try_into().unwrap()),
        caps_offset: 174,
    };
    if reply.error != SPICE_LINK_ERR_OK {
        return Err(SpiceError::LinkRejected(format!(
            "server rejected link: error code {}",
            reply.error
        )));
    }
    debug!(
        "link reply: {} common caps, {} channel caps",
        reply.num_common_caps, reply.num_channel_caps
    );

    let auth = SpiceLinkAuthMechanism {
        auth_mechanism: LINK_AUTH_MECHANISM_SPICE,
    };
    socket.write_all(&wire::encode(&auth)?).await.map_err(SpiceError::Io)?;

    let ciphertext = encrypt_password(password, &reply.pub_key)?;
    socket.write_all(&ciphertext).await.map_err(SpiceError::Io)?;
    socket.flush().await.map_err(SpiceError::Io)?;

    let mut result_buf = [0u8; 4];
    wire::read_exact(&mut socket, &mut result_buf).await?;
    let link_result = u32::from_le_bytes(result_buf);
    if link_result != SPICE_LINK_ERR_OK {
        return Err(SpiceError::LinkRejected(format!(
            "link result: error code {link_result}"
        )));
    }

    info!("{:?} channel linked", channel_type);

    let (read_half, write_half) = socket.into_split();
    let state = Arc::new(ChannelState {
        connected: AtomicBool::new(true),
        ready: AtomicBool::new(true),
        ..Default::default()
    });

    Ok(LinkedChannel {
        read_half,
        write_half: Arc::new(Mutex::new(write_half)),
        state,
    })
}

/// Builds a capability bitmap word out of 1-indexed bit positions, per the
/// literal values assigned to each capability bit.
fn encode_caps(bits: &[u32]) -> u32 {
    bits.iter().fold(0u32, |acc, bit| acc | (1 << bit))
}

/// The channel-agnostic portion of message dispatch. Returns
/// `DispatchOutcome::Ok` when the channel-specific dispatcher should still
/// look at the message.
pub async fn dispatch_common(
    state: &ChannelState,
    write_half: &Mutex<WriteHalf>,
    msg_type: u16,
    payload: &[u8],
) -> DispatchOutcome {
    match msg_type {
        common::MSG_MIGRATE | common::MSG_MIGRATE_DATA | common::MSG_WAIT_FOR_CHANNELS => {
            DispatchOutcome::Handled
        }
        common::MSG_SET_ACK => match decode_fixed::<SpiceMsgSetAck>(payload) {
            Ok(set_ack) => {
                state.ack_frequency.store(set_ack.window, Ordering::SeqCst);
                state.ack_count.store(0, Ordering::SeqCst);
                let reply = SpiceMsgcAckSync {
                    generation: set_ack.generation,
                };
                // SET_ACK itself must not count toward the window it establishes.
                match send_frame(write_half, common::MSGC_ACK_SYNC, &reply).await {
                    Ok(()) => DispatchOutcome::HandledNoAccount,
                    Err(e) => DispatchOutcome::Error(e),
                }
            }
            Err(e) => DispatchOutcome::Error(e),
        },
        common::MSG_PING => {
            if payload.len() < 12 {
                return DispatchOutcome::Error(SpiceError::Protocol("short PING".to_string()));
            }
            let id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
            let timestamp = u64::from_le_bytes(payload[4..12].try_into().unwrap());
            let pong = SpiceMsgcPong { id, timestamp };
            match send_frame(write_half, common::MSGC_PONG, &pong).await {
                Ok(()) => DispatchOutcome::Handled,
                Err(e) => DispatchOutcome::Error(e),
            }
        }
        common::MSG_DISCONNECTING => {
            let mut guard = write_half.lock().await;
            let _ = guard.shutdown().await;
            DispatchOutcome::NoData
        }
        common::MSG_NOTIFY => {
            if payload.len() >= 20 {
                let severity = u32::from_le_bytes(payload[8..12].try_into().unwrap());
                match severity {
                    0 => debug!("server notify: info"),
                    1 => warn!("server notify: warning"),
                    _ => warn!("server notify: error (severity={severity})"),
                }
            }
            DispatchOutcome::Handled
        }
        _ => DispatchOutcome::Ok,
    }
}

/// Bump the ack counter after a successfully-parsed inbound message and emit
/// `MSGC_ACK` once it reaches `ack_frequency`.
pub async fn account_and_maybe_ack(state: &ChannelState, write_half: &Mutex<WriteHalf>) -> Result<()> {
    let frequency = state.ack_frequency.load(Ordering::SeqCst);
    if frequency == 0 {
        return Ok(());
    }
    let prev = state.ack_count.fetch_add(1, Ordering::SeqCst);
    if prev + 1 == frequency {
        state.ack_count.store(0, Ordering::SeqCst);
        let mut guard = write_half.lock().await;
        let frame = MessageBuilder::new(common::MSGC_ACK).finish();
        guard.write_all(&frame).await.map_err(SpiceError::Io)?;
        guard.flush().await.map_err(SpiceError::Io)?;
    }
    Ok(())
}

/// Encode one fixed-size struct as a mini-header-framed message and send it
/// as a single `write_all` under the channel's write lock.
pub async fn send_frame<T>(write_half: &Mutex<WriteHalf>, msg_type: u16, value: &T) -> Result<()>
where
    T: BinWrite,
    T::Args<'static>: Default,
{
    let frame = MessageBuilder::new(msg_type).push(value).finish();
    let mut guard = write_half.lock().await;
    guard.write_all(&frame).await.map_err(SpiceError::Io)?;
    guard.flush().await.map_err(SpiceError::Io)
}

fn decode_fixed<T: for<'a> BinRead<Args<'a> = ()>>(payload: &[u8]) -> Result<T> {
    wire::decode(payload)
}
