//! Inputs channel: keyboard/mouse injectors and inbound init/modifier/ack
//! handling. This is the single implementation of scancode encoding,
//! motion split, and button masking — there is no duplicate elsewhere.

use crate::channel::ChannelState;
use crate::error::{DispatchOutcome, Result, SpiceError};
use crate::protocol::{
    inputs, SpiceMsgInputsKeyModifiers, SpiceMsgcKeyDown, SpiceMsgcKeyUp, SpiceMsgcKeyModifiers,
    SpiceMsgcMouseButton, SpiceMsgcMouseMotionEntry, SpiceMsgcMousePosition,
    SPICE_INPUT_MOTION_ACK_BUNCH,
};
use crate::transport::WriteHalf;
use crate::wire::{self, MessageBuilder};
use binrw::BinWrite;
use std::io::Cursor;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
    Side,
    Extra,
}

impl MouseButton {
    fn mask(self) -> u32 {
        match self {
            MouseButton::Left => inputs::BUTTON_LEFT,
            MouseButton::Middle => inputs::BUTTON_MIDDLE,
            MouseButton::Right => inputs::BUTTON_RIGHT,
            MouseButton::WheelUp => inputs::BUTTON_WHEEL_UP,
            MouseButton::WheelDown => inputs::BUTTON_WHEEL_DOWN,
            MouseButton::Side => inputs::BUTTON_SIDE,
            MouseButton::Extra => inputs::BUTTON_EXTRA,
        }
    }
}

/// Mouse button and motion-ack bookkeeping, guarded separately from the
/// channel's I/O lock: button-state read-modify-write must be atomic
/// with respect to concurrent press/release/motion calls, independent of
/// whatever is happening on the wire.
pub struct InputsState {
    pub button_state: StdMutex<u32>,
    pub sent_count: AtomicI32,
    pub modifiers: AtomicU32,
}

impl Default for InputsState {
    fn default() -> Self {
        Self {
            button_state: StdMutex::new(0),
            sent_count: AtomicI32::new(0),
            modifiers: AtomicU32::new(0),
        }
    }
}

/// Encode `code` (press): low byte for `<0x100`, else the two-byte
/// `0xe0 | ((code-0x100)<<8)` form.
fn key_down_code(code: u32) -> u32 {
    if code < 0x100 {
        code
    } else {
        0xe0 | ((code - 0x100) << 8)
    }
}

/// Encode `code` (release): low-byte form sets the high bit of the low byte;
/// two-byte form sets the high bit of the *second* byte (`0x80e0 | ...`).
fn key_up_code(code: u32) -> u32 {
    if code < 0x100 {
        code | 0x80
    } else {
        0x80e0 | ((code - 0x100) << 8)
    }
}

pub async fn key_down(write_half: &Mutex<WriteHalf>, code: u32) -> Result<()> {
    let msg = SpiceMsgcKeyDown { code: key_down_code(code) };
    crate::channel::send_frame(write_half, inputs::MSGC_KEY_DOWN, &msg).await
}

pub async fn key_up(write_half: &Mutex<WriteHalf>, code: u32) -> Result<()> {
    let msg = SpiceMsgcKeyUp { code: key_up_code(code) };
    crate::channel::send_frame(write_half, inputs::MSGC_KEY_UP, &msg).await
}

pub async fn key_modifiers(write_half: &Mutex<WriteHalf>, mask: u32) -> Result<()> {
    let msg = SpiceMsgcKeyModifiers { modifiers: mask as u16 };
    crate::channel::send_frame(write_half, inputs::MSGC_KEY_MODIFIERS, &msg).await
}

pub async fn mouse_position(
    state: &InputsState,
    write_half: &Mutex<WriteHalf>,
    x: u32,
    y: u32,
) -> Result<()> {
    let button_state = *state.button_state.lock().unwrap() as u16;
    let msg = SpiceMsgcMousePosition {
        x,
        y,
        button_state,
        display_id: 0,
    };
    state.sent_count.fetch_add(1, Ordering::SeqCst);
    crate::channel::send_frame(write_half, inputs::MSGC_MOUSE_POSITION, &msg).await
}

/// Split `(dx,dy)` into `ceil(max(|dx|,|dy|)/127)` sub-motions, each
/// saturated to `[-127,127]`, and send the whole buffer in one `write_all`
/// (testable properties 3 & 4).
pub async fn mouse_motion(
    state: &InputsState,
    write_half: &Mutex<WriteHalf>,
    dx: i32,
    dy: i32,
) -> Result<()> {
    let button_state = *state.button_state.lock().unwrap() as u16;
    let steps = ((dx.unsigned_abs().max(dy.unsigned_abs())) as f64 / 127.0).ceil() as u32;
    let steps = steps.max(1);

    let mut remaining_x = dx;
    let mut remaining_y = dy;
    let mut body = Vec::with_capacity(steps as usize * 10);

    for _ in 0..steps {
        let step_x = remaining_x.clamp(-127, 127);
        let step_y = remaining_y.clamp(-127, 127);
        remaining_x -= step_x;
        remaining_y -= step_y;

        let entry = SpiceMsgcMouseMotionEntry {
            dx: step_x,
            dy: step_y,
            button_state,
        };
        let mut cursor = Cursor::new(Vec::new());
        entry.write_le(&mut cursor)?;
        let frame = MessageBuilder::new(inputs::MSGC_MOUSE_MOTION)
            .body(&cursor.into_inner())
            .finish();
        body.extend_from_slice(&frame);
    }

    state.sent_count.fetch_add(steps as i32, Ordering::SeqCst);
    let mut guard = write_half.lock().await;
    guard.write_all(&body).await.map_err(SpiceError::Io)?;
    guard.flush().await.map_err(SpiceError::Io)
}

pub async fn mouse_press(
    state: &InputsState,
    write_half: &Mutex<WriteHalf>,
    button: MouseButton,
) -> Result<()> {
    let button_state = {
        let mut guard = state.button_state.lock().unwrap();
        *guard |= button.mask();
        *guard as u16
    };
    let msg = SpiceMsgcMouseButton {
        button: button_index(button),
        button_state,
    };
    crate::channel::send_frame(write_half, inputs::MSGC_MOUSE_PRESS, &msg).await
}

pub async fn mouse_release(
    state: &InputsState,
    write_half: &Mutex<WriteHalf>,
    button: MouseButton,
) -> Result<()> {
    let button_state = {
        let mut guard = state.button_state.lock().unwrap();
        *guard &= !button.mask();
        *guard as u16
    };
    let msg = SpiceMsgcMouseButton {
        button: button_index(button),
        button_state,
    };
    crate::channel::send_frame(write_half, inputs::MSGC_MOUSE_RELEASE, &msg).await
}

fn button_index(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 1,
        MouseButton::Middle => 2,
        MouseButton::Right => 3,
        MouseButton::WheelUp => 4,
        MouseButton::WheelDown => 5,
        MouseButton::Side => 6,
        MouseButton::Extra => 7,
    }
}

/// Channel-specific dispatch for the Inputs channel. Before `initDone`, only
/// `INPUTS_INIT` is legal.
pub async fn dispatch(
    channel: &ChannelState,
    state: &InputsState,
    msg_type: u16,
    payload: &[u8],
) -> DispatchOutcome {
    let init_done = channel.init_done.load(Ordering::SeqCst);

    if !init_done && msg_type != inputs::MSG_INIT {
        return DispatchOutcome::Error(SpiceError::Protocol(
            "message received before INPUTS_INIT".to_string(),
        ));
    }

    match msg_type {
        inputs::MSG_INIT => match wire::decode::<crate::protocol::SpiceMsgInputsInit>(payload) {
            Ok(init) => {
                state.modifiers.store(init.modifiers as u32, Ordering::SeqCst);
                channel.init_done.store(true, Ordering::SeqCst);
                DispatchOutcome::Handled
            }
            Err(e) => DispatchOutcome::Error(e),
        },
        inputs::MSG_KEY_MODIFIERS => match wire::decode::<SpiceMsgInputsKeyModifiers>(payload) {
            Ok(msg) => {
                state.modifiers.store(msg.modifiers as u32, Ordering::SeqCst);
                DispatchOutcome::Handled
            }
            Err(e) => DispatchOutcome::Error(e),
        },
        inputs::MSG_MOUSE_MOTION_ACK => {
            let prev = state.sent_count.fetch_sub(SPICE_INPUT_MOTION_ACK_BUNCH, Ordering::SeqCst);
            if prev < SPICE_INPUT_MOTION_ACK_BUNCH {
                warn!(prev, "server over-acked mouse motion");
                return DispatchOutcome::Error(SpiceError::Protocol(
                    "mouse motion ack exceeded outstanding count".to_string(),
                ));
            }
            DispatchOutcome::Handled
        }
        other => {
            warn!(msg_type = other, "unhandled inputs message");
            DispatchOutcome::Handled
        }
    }
}
