//! Per-channel-kind logic layered on top of `crate::channel`'s shared link
//! handshake and common-message dispatch: Main, Inputs, and Playback.

pub mod inputs;
pub mod main;
pub mod playback;

pub use inputs::{InputsState, MouseButton};
pub use main::{MainContext, MainState};
pub use playback::{PlaybackCallbacks, PlaybackState, SampleFormat};
