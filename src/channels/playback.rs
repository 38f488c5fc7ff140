//! Playback (server-to-client audio) channel dispatch. Inbound
//! messages drive caller-registered sink callbacks; there is no outbound
//! steady-state traffic beyond the link handshake and common acks.

use crate::channel::ChannelState;
use crate::error::{DispatchOutcome, Result, SpiceError};
use crate::protocol::{
    playback, SpiceMsgPlaybackDataHeader, SpiceMsgPlaybackMute, SpiceMsgPlaybackStart,
    SpiceMsgPlaybackVolumeHeader, SPICE_AUDIO_FMT_S16,
};
use crate::wire;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    S16,
    Invalid,
}

pub type StartCb = Arc<dyn Fn(u32, u32, SampleFormat, u32) + Send + Sync>;
pub type DataCb = Arc<dyn Fn(&[u8], u32) + Send + Sync>;
pub type StopCb = Arc<dyn Fn() + Send + Sync>;
pub type VolumeCb = Arc<dyn Fn(&[u16]) + Send + Sync>;
pub type MuteCb = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
pub struct PlaybackCallbacks {
    pub start: Option<StartCb>,
    pub data: Option<DataCb>,
    pub stop: Option<StopCb>,
    pub volume: Option<VolumeCb>,
    pub mute: Option<MuteCb>,
}

pub struct PlaybackState {
    pub callbacks: Mutex<PlaybackCallbacks>,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(PlaybackCallbacks::default()),
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel-specific half of dispatch; only called once the common dispatcher
/// (`channel::dispatch_common`) has returned `Ok` (not handled there).
pub async fn dispatch(
    channel: &ChannelState,
    state: &PlaybackState,
    msg_type: u16,
    payload: &[u8],
) -> DispatchOutcome {
    if !channel.init_done.load(Ordering::SeqCst) {
        // Playback has no dedicated init message; the first legal message
        // is whatever the server sends first, so mark ready on first dispatch.
        channel.init_done.store(true, Ordering::SeqCst);
    }

    let result: Result<()> = match msg_type {
        playback::MSG_START => handle_start(state, payload).await,
        playback::MSG_DATA => handle_data(state, payload).await,
        playback::MSG_STOP => handle_stop(state).await,
        playback::MSG_VOLUME => handle_volume(state, payload).await,
        playback::MSG_MUTE => handle_mute(state, payload).await,
        other => {
            warn!(msg_type = other, "unhandled playback message");
            Ok(())
        }
    };

    match result {
        Ok(()) => DispatchOutcome::Handled,
        Err(e) => DispatchOutcome::Error(e),
    }
}

async fn handle_start(state: &PlaybackState, payload: &[u8]) -> Result<()> {
    let start = wire::decode::<SpiceMsgPlaybackStart>(payload)?;
    let format = if start.format == SPICE_AUDIO_FMT_S16 {
        SampleFormat::S16
    } else {
        SampleFormat::Invalid
    };
    let callbacks = state.callbacks.lock().await;
    if let Some(cb) = &callbacks.start {
        cb(start.channels, start.frequency, format, start.time);
    }
    Ok(())
}

async fn handle_data(state: &PlaybackState, payload: &[u8]) -> Result<()> {
    if payload.len() < 4 {
        return Err(SpiceError::Protocol("short PLAYBACK_DATA".to_string()));
    }
    let _header = wire::decode::<SpiceMsgPlaybackDataHeader>(&payload[0..4])?;
    let samples = &payload[4..];
    let callbacks = state.callbacks.lock().await;
    if let Some(cb) = &callbacks.data {
        cb(samples, samples.len() as u32);
    }
    Ok(())
}

async fn handle_stop(state: &PlaybackState) -> Result<()> {
    let callbacks = state.callbacks.lock().await;
    if let Some(cb) = &callbacks.stop {
        cb();
    }
    Ok(())
}

async fn handle_volume(state: &PlaybackState, payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Err(SpiceError::Protocol("short PLAYBACK_VOLUME".to_string()));
    }
    let header = wire::decode::<SpiceMsgPlaybackVolumeHeader>(&payload[0..1])?;
    let expected = 1 + header.nchannels as usize * 2;
    if payload.len() < expected {
        return Err(SpiceError::Protocol("truncated PLAYBACK_VOLUME".to_string()));
    }
    let volumes: Vec<u16> = payload[1..expected]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let callbacks = state.callbacks.lock().await;
    if let Some(cb) = &callbacks.volume {
        cb(&volumes);
    }
    Ok(())
}

async fn handle_mute(state: &PlaybackState, payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Err(SpiceError::Protocol("short PLAYBACK_MUTE".to_string()));
    }
    let mute = wire::decode::<SpiceMsgPlaybackMute>(&payload[0..1])?;
    let callbacks = state.callbacks.lock().await;
    if let Some(cb) = &callbacks.mute {
        cb(mute.mute != 0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn start_dispatch_invokes_callback_with_decoded_fields() {
        let channel = ChannelState::default();
        let state = PlaybackState::new();
        let seen = Arc::new(StdMutex::new(None));
        let seen_clone = seen.clone();
        state.callbacks.lock().await.start = Some(Arc::new(move |channels, freq, fmt, time| {
            *seen_clone.lock().unwrap() = Some((channels, freq, fmt, time));
        }));

        let msg = SpiceMsgPlaybackStart {
            channels: 2,
            frequency: 44100,
            format: SPICE_AUDIO_FMT_S16,
            time: 1234,
        };
        let payload = wire::encode(&msg).unwrap();
        let outcome = dispatch(&channel, &state, playback::MSG_START, &payload).await;
        assert!(matches!(outcome, DispatchOutcome::Handled));
        assert_eq!(*seen.lock().unwrap(), Some((2, 44100, SampleFormat::S16, 1234)));
    }
}
