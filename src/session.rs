//! The public, async, `Arc`-backed session handle replacing the
//! original design's process-wide singleton: `ClientBuilder` configures a
//! connection, `Session::connect` runs the Main-channel handshake and spawns
//! the per-channel background tasks, and the rest of this module's methods
//! are the input/clipboard/audio surface foreign tasks call into.

use crate::agent::{self, AgentState, ClipboardCallbacks, ClipboardNoticePolicy, DataType};
use crate::channel::{self, ChannelState, LinkedChannel};
use crate::channels::inputs::{self, InputsState, MouseButton};
use crate::channels::main::{self as main_channel, MainContext, MainState};
use crate::channels::playback::{self, PlaybackCallbacks, PlaybackState};
use crate::error::{DispatchOutcome, Result, SpiceError};
use crate::protocol::{
    main as main_proto, ChannelType, CAP_MAIN_AGENT_CONNECTED_TOKENS, CAP_PLAYBACK_VOLUME,
};
use crate::transport::{Endpoint, WriteHalf};
use crate::wire;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct ChannelHandle {
    write_half: Arc<Mutex<WriteHalf>>,
    state: Arc<ChannelState>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    async fn shutdown(&self) {
        let mut guard = self.write_half.lock().await;
        let _ = guard.shutdown().await;
    }
}

struct SessionInner {
    endpoint: Endpoint,
    password: String,
    enable_playback: bool,
    main: RwLock<Option<ChannelHandle>>,
    inputs: RwLock<Option<ChannelHandle>>,
    playback: RwLock<Option<ChannelHandle>>,
    main_state: Arc<MainState>,
    inputs_state: Arc<InputsState>,
    playback_state: Arc<PlaybackState>,
    agent: Arc<AgentState>,
    alive: AtomicBool,
    disconnect_notify: Notify,
}

/// Cloneable handle to one SPICE session. Every clone shares the same
/// underlying channels; input/clipboard/audio methods may be called from
/// any task holding a clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// Builds a [`Session`] from a `spice://host:port` or `spice+unix:///path`
/// URI, mirroring this crate's existing builder-style construction API.
pub struct ClientBuilder {
    endpoint: Endpoint,
    password: String,
    enable_playback: bool,
    notice_policy: ClipboardNoticePolicy,
}

impl ClientBuilder {
    pub fn new(uri: &str) -> Self {
        let endpoint = if let Some(path) = uri.strip_prefix("spice+unix://") {
            Endpoint::Unix { path: path.to_string() }
        } else {
            let rest = uri.trim_start_matches("spice://");
            let mut parts = rest.splitn(2, ':');
            let host = parts.next().unwrap_or("localhost").to_string();
            let port = parts.next().and_then(|p| p.parse().ok()).unwrap_or(5900);
            Endpoint::Tcp { host, port }
        };

        Self {
            endpoint,
            password: String::new(),
            enable_playback: false,
            notice_policy: ClipboardNoticePolicy::default(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_playback(mut self, enable: bool) -> Self {
        self.enable_playback = enable;
        self
    }

    pub fn with_clipboard_notice_policy(mut self, policy: ClipboardNoticePolicy) -> Self {
        self.notice_policy = policy;
        self
    }

    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                endpoint: self.endpoint,
                password: self.password,
                enable_playback: self.enable_playback,
                main: RwLock::new(None),
                inputs: RwLock::new(None),
                playback: RwLock::new(None),
                main_state: Arc::new(MainState::default()),
                inputs_state: Arc::new(InputsState::default()),
                playback_state: Arc::new(PlaybackState::new()),
                agent: Arc::new(AgentState::new(self.notice_policy)),
                alive: AtomicBool::new(false),
                disconnect_notify: Notify::new(),
            }),
        }
    }
}

impl Session {
    /// Link the Main channel and spawn its background read task. The
    /// Main-channel dispatcher triggers `link_inputs`/`link_playback` itself
    /// once `MSG_MAIN_CHANNELS_LIST` arrives.
    pub async fn connect(&self) -> Result<bool> {
        let main_caps = [CAP_MAIN_AGENT_CONNECTED_TOKENS];
        let linked = channel::link_channel(
            &self.inner.endpoint,
            ChannelType::Main,
            0,
            &self.inner.password,
            &main_caps,
        )
        .await?;

        self.inner.alive.store(true, Ordering::SeqCst);
        self.spawn_main(linked);
        Ok(true)
    }

    fn spawn_main(&self, linked: LinkedChannel) {
        let write_half = linked.write_half;
        let state = linked.state.clone();

        let session_for_inputs = self.clone();
        let session_for_playback = self.clone();
        let ctx = Arc::new(MainContext {
            agent: self.inner.agent.clone(),
            enable_playback: self.inner.enable_playback,
            spawn_inputs: Arc::new(move || {
                let session = session_for_inputs.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.link_inputs().await {
                        warn!(error = %e, "failed to link Inputs channel");
                    }
                });
            }),
            spawn_playback: Arc::new(move || {
                let session = session_for_playback.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.link_playback().await {
                        warn!(error = %e, "failed to link Playback channel");
                    }
                });
            }),
        });

        let main_state = self.inner.main_state.clone();
        let session = self.clone();
        let mut read_half = linked.read_half;
        let write_half_loop = write_half.clone();
        let state_loop = state.clone();

        let task = tokio::spawn(async move {
            loop {
                let (msg_type, payload) = match wire::read_message(&mut read_half).await {
                    Ok(frame) => frame,
                    Err(SpiceError::ConnectionClosed) => break,
                    Err(e) => {
                        warn!(error = %e, "main channel read error");
                        break;
                    }
                };

                let outcome = channel::dispatch_common(&state_loop, &write_half_loop, msg_type, &payload).await;
                let outcome = match outcome {
                    DispatchOutcome::Ok => {
                        main_channel::dispatch(&state_loop, &main_state, &ctx, &write_half_loop, msg_type, &payload)
                            .await
                    }
                    other => other,
                };

                match outcome {
                    DispatchOutcome::Error(e) => {
                        warn!(error = %e, "main channel protocol error");
                        break;
                    }
                    DispatchOutcome::NoData => break,
                    DispatchOutcome::HandledNoAccount => {}
                    _ => {
                        let _ = channel::account_and_maybe_ack(&state_loop, &write_half_loop).await;
                    }
                }
            }
            session.tear_down().await;
        });

        tokio::spawn({
            let inner = self.inner.clone();
            async move {
                *inner.main.write().await = Some(ChannelHandle { write_half, state, task });
            }
        });
    }

    async fn link_inputs(&self) -> Result<()> {
        let linked = channel::link_channel(
            &self.inner.endpoint,
            ChannelType::Inputs,
            self.inner.main_state.session_id.load(Ordering::SeqCst),
            &self.inner.password,
            &[],
        )
        .await?;

        let write_half = linked.write_half;
        let state = linked.state.clone();
        let inputs_state = self.inner.inputs_state.clone();
        let mut read_half = linked.read_half;
        let write_half_loop = write_half.clone();
        let state_loop = state.clone();
        let session = self.clone();

        let task = tokio::spawn(async move {
            loop {
                let (msg_type, payload) = match wire::read_message(&mut read_half).await {
                    Ok(frame) => frame,
                    Err(_) => break,
                };
                let outcome = channel::dispatch_common(&state_loop, &write_half_loop, msg_type, &payload).await;
                let outcome = match outcome {
                    DispatchOutcome::Ok => inputs::dispatch(&state_loop, &inputs_state, msg_type, &payload).await,
                    other => other,
                };
                match outcome {
                    DispatchOutcome::Error(e) => {
                        warn!(error = %e, "inputs channel protocol error");
                        break;
                    }
                    DispatchOutcome::NoData => break,
                    DispatchOutcome::HandledNoAccount => {}
                    _ => {
                        let _ = channel::account_and_maybe_ack(&state_loop, &write_half_loop).await;
                    }
                }
            }
            let _ = session;
        });

        *self.inner.inputs.write().await = Some(ChannelHandle { write_half, state, task });
        info!("inputs channel ready");
        Ok(())
    }

    async fn link_playback(&self) -> Result<()> {
        let playback_caps = [CAP_PLAYBACK_VOLUME];
        let linked = channel::link_channel(
            &self.inner.endpoint,
            ChannelType::Playback,
            self.inner.main_state.session_id.load(Ordering::SeqCst),
            &self.inner.password,
            &playback_caps,
        )
        .await?;

        let write_half = linked.write_half;
        let state = linked.state.clone();
        let playback_state = self.inner.playback_state.clone();
        let mut read_half = linked.read_half;
        let write_half_loop = write_half.clone();
        let state_loop = state.clone();

        let task = tokio::spawn(async move {
            loop {
                let (msg_type, payload) = match wire::read_message(&mut read_half).await {
                    Ok(frame) => frame,
                    Err(_) => break,
                };
                let outcome = channel::dispatch_common(&state_loop, &write_half_loop, msg_type, &payload).await;
                let outcome = match outcome {
                    DispatchOutcome::Ok => {
                        playback::dispatch(&state_loop, &playback_state, msg_type, &payload).await
                    }
                    other => other,
                };
                match outcome {
                    DispatchOutcome::Error(e) => {
                        warn!(error = %e, "playback channel protocol error");
                        break;
                    }
                    DispatchOutcome::NoData => break,
                    DispatchOutcome::HandledNoAccount => {}
                    _ => {
                        let _ = channel::account_and_maybe_ack(&state_loop, &write_half_loop).await;
                    }
                }
            }
        });

        *self.inner.playback.write().await = Some(ChannelHandle { write_half, state, task });
        info!("playback channel ready");
        Ok(())
    }

    async fn tear_down(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        self.inner.disconnect_notify.notify_waiters();
    }

    /// Close every linked channel and abort their background tasks.
    pub async fn disconnect(&self) {
        for slot in [&self.inner.main, &self.inner.inputs, &self.inner.playback] {
            if let Some(handle) = slot.write().await.take() {
                handle.shutdown().await;
                handle.task.abort();
            }
        }
        self.tear_down().await;
    }

    /// True once Main and Inputs are both linked and ready (S1's definition
    /// of readiness; Playback is optional and not required).
    pub fn ready(&self) -> bool {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return false;
        }
        match self.inner.inputs.try_read() {
            Ok(guard) => guard.as_ref().is_some_and(|h| h.state.ready.load(Ordering::SeqCst)),
            Err(_) => false,
        }
    }

    /// Wait up to `timeout` for a disconnect notification; returns whether
    /// the session is still alive. Stands in for the original single-threaded
    /// `process(timeoutMs)` loop, since the per-channel tasks already run
    /// continuously once connected.
    pub async fn process(&self, timeout: Duration) -> bool {
        let notified = self.inner.disconnect_notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(timeout) => {}
        }
        self.inner.alive.load(Ordering::SeqCst)
    }

    async fn inputs_write_half(&self) -> Result<Arc<Mutex<WriteHalf>>> {
        self.inner
            .inputs
            .read()
            .await
            .as_ref()
            .map(|h| h.write_half.clone())
            .ok_or_else(|| SpiceError::Channel("Inputs channel not linked".to_string()))
    }

    async fn main_write_half(&self) -> Result<Arc<Mutex<WriteHalf>>> {
        self.inner
            .main
            .read()
            .await
            .as_ref()
            .map(|h| h.write_half.clone())
            .ok_or_else(|| SpiceError::Channel("Main channel not linked".to_string()))
    }

    pub async fn key_down(&self, code: u32) -> Result<()> {
        let write_half = self.inputs_write_half().await?;
        inputs::key_down(&write_half, code).await
    }

    pub async fn key_up(&self, code: u32) -> Result<()> {
        let write_half = self.inputs_write_half().await?;
        inputs::key_up(&write_half, code).await
    }

    pub async fn key_modifiers(&self, mask: u32) -> Result<()> {
        let write_half = self.inputs_write_half().await?;
        inputs::key_modifiers(&write_half, mask).await
    }

    pub async fn mouse_mode(&self, server: bool) -> Result<()> {
        let write_half = self.main_write_half().await?;
        let mode = if server {
            main_channel::MOUSE_MODE_SERVER
        } else {
            main_channel::MOUSE_MODE_CLIENT
        };
        let request = crate::protocol::SpiceMsgcMainMouseModeRequest { mouse_mode: mode as u16 };
        channel::send_frame(&write_half, main_proto::MSGC_MOUSE_MODE_REQUEST, &request).await
    }

    pub async fn mouse_position(&self, x: u32, y: u32) -> Result<()> {
        let write_half = self.inputs_write_half().await?;
        inputs::mouse_position(&self.inner.inputs_state, &write_half, x, y).await
    }

    pub async fn mouse_motion(&self, dx: i32, dy: i32) -> Result<()> {
        let write_half = self.inputs_write_half().await?;
        inputs::mouse_motion(&self.inner.inputs_state, &write_half, dx, dy).await
    }

    pub async fn mouse_press(&self, button: MouseButton) -> Result<()> {
        let write_half = self.inputs_write_half().await?;
        inputs::mouse_press(&self.inner.inputs_state, &write_half, button).await
    }

    pub async fn mouse_release(&self, button: MouseButton) -> Result<()> {
        let write_half = self.inputs_write_half().await?;
        inputs::mouse_release(&self.inner.inputs_state, &write_half, button).await
    }

    /// `notice` and `data` must be set together or both left `None`.
    pub async fn set_clipboard_cb(&self, callbacks: ClipboardCallbacks) -> Result<()> {
        if callbacks.notice.is_some() != callbacks.data.is_some() {
            return Err(SpiceError::Protocol(
                "clipboard notice and data callbacks must be set together".to_string(),
            ));
        }
        self.inner.agent.set_callbacks(callbacks).await;
        Ok(())
    }

    pub async fn clipboard_grab(&self, types: &[DataType]) -> Result<()> {
        let write_half = self.main_write_half().await?;
        agent::clipboard_grab(&self.inner.agent, &write_half, types).await
    }

    pub async fn clipboard_release(&self) -> Result<()> {
        let write_half = self.main_write_half().await?;
        agent::clipboard_release(&self.inner.agent, &write_half).await
    }

    pub async fn clipboard_request(&self, data_type: DataType) -> Result<()> {
        let write_half = self.main_write_half().await?;
        agent::clipboard_request(&self.inner.agent, &write_half, data_type).await
    }

    pub async fn clipboard_data_start(&self, data_type: DataType, total_size: usize) -> Result<()> {
        let write_half = self.main_write_half().await?;
        agent::clipboard_data_start(&self.inner.agent, &write_half, data_type, total_size).await
    }

    pub async fn clipboard_data(&self, chunk: &[u8]) -> Result<()> {
        let write_half = self.main_write_half().await?;
        agent::clipboard_data(&self.inner.agent, &write_half, chunk).await
    }

    pub async fn set_audio_cb(&self, callbacks: PlaybackCallbacks) {
        *self.inner.playback_state.callbacks.lock().await = callbacks;
    }
}
