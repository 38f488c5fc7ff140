//! Main channel: session bootstrap (`MSG_MAIN_INIT`), triggering the Inputs
//! and Playback channel links off `MSG_MAIN_CHANNELS_LIST`, and the agent
//! connect/disconnect/token/data plumbing that feeds `crate::agent`.

use crate::agent::{self, AgentState};
use crate::channel::ChannelState;
use crate::error::{DispatchOutcome, Result, SpiceError};
use crate::protocol::{
    main as main_proto, ChannelType, SpiceMsgMainAgentConnectedTokens,
    SpiceMsgMainAgentDisconnected, SpiceMsgMainAgentToken, SpiceMsgMainInit,
    SpiceMsgMainMouseMode, SpiceMsgcMainMouseModeRequest,
};
use crate::transport::WriteHalf;
use crate::wire::{self, MessageBuilder};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const MOUSE_MODE_SERVER: u32 = 1;
pub const MOUSE_MODE_CLIENT: u32 = 2;

/// Main-channel-specific state: session id and whether each follow-on
/// channel has already been linked (duplicate link attempts are a protocol
/// error, not a silent re-run).
#[derive(Default)]
pub struct MainState {
    pub session_id: AtomicU32,
    pub inputs_linked: AtomicBool,
    pub playback_linked: AtomicBool,
}

/// Everything the Main channel's dispatcher needs to react to server
/// messages by acting on the rest of the session: the agent state it
/// forwards `AGENT_DATA` into, and callbacks that ask the session to link
/// and spawn the Inputs/Playback channels. Expressed as callbacks rather
/// than a direct dependency on `Session` to avoid a module cycle.
pub struct MainContext {
    pub agent: Arc<AgentState>,
    pub enable_playback: bool,
    pub spawn_inputs: Arc<dyn Fn() + Send + Sync>,
    pub spawn_playback: Arc<dyn Fn() + Send + Sync>,
}

pub async fn dispatch(
    channel: &ChannelState,
    state: &MainState,
    ctx: &MainContext,
    write_half: &Mutex<WriteHalf>,
    msg_type: u16,
    payload: &[u8],
) -> DispatchOutcome {
    let init_done = channel.init_done.load(Ordering::SeqCst);
    if !init_done && msg_type != main_proto::MSG_INIT {
        return DispatchOutcome::Error(SpiceError::Protocol(
            "message received before MAIN_INIT".to_string(),
        ));
    }

    let result = match msg_type {
        main_proto::MSG_INIT => handle_init(channel, state, ctx, write_half, payload).await,
        main_proto::MSG_CHANNELS_LIST => handle_channels_list(state, ctx, payload).await,
        main_proto::MSG_MOUSE_MODE => handle_mouse_mode(payload).await,
        main_proto::MSG_AGENT_CONNECTED => agent::agent_connect(&ctx.agent, write_half).await,
        main_proto::MSG_AGENT_CONNECTED_TOKENS => {
            handle_agent_connected_tokens(ctx, write_half, payload).await
        }
        main_proto::MSG_AGENT_DISCONNECTED => {
            handle_agent_disconnected(ctx, payload);
            Ok(())
        }
        main_proto::MSG_AGENT_DATA => agent::handle_agent_data(&ctx.agent, write_half, payload).await,
        main_proto::MSG_AGENT_TOKEN => handle_agent_token(ctx, write_half, payload).await,
        other => {
            debug!(msg_type = other, "discarding unhandled main message");
            Ok(())
        }
    };

    match result {
        Ok(()) => DispatchOutcome::Handled,
        Err(e) => DispatchOutcome::Error(e),
    }
}

async fn handle_init(
    channel: &ChannelState,
    state: &MainState,
    ctx: &MainContext,
    write_half: &Mutex<WriteHalf>,
    payload: &[u8],
) -> Result<()> {
    let init = wire::decode::<SpiceMsgMainInit>(payload)?;
    state.session_id.store(init.session_id, Ordering::SeqCst);
    ctx.agent.server_tokens.store(init.agent_tokens, Ordering::SeqCst);
    info!(session_id = init.session_id, "main channel initialized");

    if init.agent_connected != 0 {
        agent::agent_connect(&ctx.agent, write_half).await?;
    }

    if init.current_mouse_mode != MOUSE_MODE_CLIENT {
        let request = SpiceMsgcMainMouseModeRequest {
            mouse_mode: MOUSE_MODE_SERVER as u16,
        };
        crate::channel::send_frame(write_half, main_proto::MSGC_MOUSE_MODE_REQUEST, &request).await?;
    }

    let attach = MessageBuilder::new(main_proto::MSGC_ATTACH_CHANNELS).finish();
    {
        use crate::transport::Transport;
        let mut guard = write_half.lock().await;
        guard.write_all(&attach).await.map_err(SpiceError::Io)?;
        guard.flush().await.map_err(SpiceError::Io)?;
    }

    channel.init_done.store(true, Ordering::SeqCst);
    Ok(())
}

async fn handle_channels_list(state: &MainState, ctx: &MainContext, payload: &[u8]) -> Result<()> {
    if payload.len() < 4 {
        return Err(SpiceError::Protocol("short CHANNELS_LIST".to_string()));
    }
    let num_channels = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let entries = &payload[4..];
    if entries.len() < num_channels * 2 {
        return Err(SpiceError::Protocol("truncated CHANNELS_LIST".to_string()));
    }

    for i in 0..num_channels {
        let channel_type = ChannelType::from(entries[i * 2]);
        match channel_type {
            ChannelType::Inputs => {
                if state.inputs_linked.swap(true, Ordering::SeqCst) {
                    return Err(SpiceError::Protocol(
                        "duplicate Inputs link attempt".to_string(),
                    ));
                }
                (ctx.spawn_inputs)();
            }
            ChannelType::Playback if ctx.enable_playback => {
                if state.playback_linked.swap(true, Ordering::SeqCst) {
                    return Err(SpiceError::Protocol(
                        "duplicate Playback link attempt".to_string(),
                    ));
                }
                (ctx.spawn_playback)();
            }
            _ => {}
        }
    }
    Ok(())
}

async fn handle_mouse_mode(payload: &[u8]) -> Result<()> {
    let mode = wire::decode::<SpiceMsgMainMouseMode>(payload)?;
    debug!(current = mode.current_mode, "server mouse mode update");
    Ok(())
}

async fn handle_agent_connected_tokens(
    ctx: &MainContext,
    write_half: &Mutex<WriteHalf>,
    payload: &[u8],
) -> Result<()> {
    let msg = wire::decode::<SpiceMsgMainAgentConnectedTokens>(payload)?;
    ctx.agent.server_tokens.store(msg.num_tokens, Ordering::SeqCst);
    agent::agent_connect(&ctx.agent, write_half).await
}

fn handle_agent_disconnected(ctx: &MainContext, payload: &[u8]) {
    match wire::decode::<SpiceMsgMainAgentDisconnected>(payload) {
        Ok(msg) => warn!(error_code = msg.error_code, "agent disconnected"),
        Err(_) => warn!("agent disconnected (unparsable payload)"),
    }
    agent::agent_disconnect(&ctx.agent);
}

async fn handle_agent_token(
    ctx: &MainContext,
    write_half: &Mutex<WriteHalf>,
    payload: &[u8],
) -> Result<()> {
    let msg = wire::decode::<SpiceMsgMainAgentToken>(payload)?;
    ctx.agent.server_tokens.fetch_add(msg.num_tokens, Ordering::SeqCst);
    agent::drain_tx_queue(&ctx.agent, write_half).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ClipboardNoticePolicy;
    use std::sync::atomic::AtomicUsize;

    fn test_ctx() -> (MainContext, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let inputs_calls = Arc::new(AtomicUsize::new(0));
        let playback_calls = Arc::new(AtomicUsize::new(0));
        let ic = inputs_calls.clone();
        let pc = playback_calls.clone();
        let ctx = MainContext {
            agent: Arc::new(AgentState::new(ClipboardNoticePolicy::default())),
            enable_playback: true,
            spawn_inputs: Arc::new(move || {
                ic.fetch_add(1, Ordering::SeqCst);
            }),
            spawn_playback: Arc::new(move || {
                pc.fetch_add(1, Ordering::SeqCst);
            }),
        };
        (ctx, inputs_calls, playback_calls)
    }

    #[tokio::test]
    async fn channels_list_spawns_inputs_and_playback_once_each() {
        let state = MainState::default();
        let (ctx, inputs_calls, playback_calls) = test_ctx();

        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.push(ChannelType::Inputs as u8);
        payload.push(0);
        payload.push(ChannelType::Playback as u8);
        payload.push(0);

        handle_channels_list(&state, &ctx, &payload).await.unwrap();
        assert_eq!(inputs_calls.load(Ordering::SeqCst), 1);
        assert_eq!(playback_calls.load(Ordering::SeqCst), 1);

        let err = handle_channels_list(&state, &ctx, &payload).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn mouse_mode_decoding_does_not_error() {
        let msg = SpiceMsgMainMouseMode {
            supported_modes: 3,
            current_mode: MOUSE_MODE_SERVER as u16,
        };
        let payload = wire::encode(&msg).unwrap();
        handle_mouse_mode(&payload).await.unwrap();
    }
}
