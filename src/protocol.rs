//! Wire-level types for the subset of the SPICE protocol this crate speaks:
//! the link handshake, the universal mini-header, and the Main/Inputs/Playback
//! channel message bodies. Everything here is `binrw`-derived, packed and
//! little-endian, matching the protocol's on-the-wire layout directly.

use binrw::{BinRead, BinWrite};

pub const SPICE_MAGIC: u32 = 0x51444552; // "REDQ"
pub const SPICE_VERSION_MAJOR: u32 = 2;
pub const SPICE_VERSION_MINOR: u32 = 2;

pub const SPICE_LINK_ERR_OK: u32 = 0;

/// Capability bit positions, per the subset this client negotiates.
pub const CAP_COMMON_AUTH_SELECTION: u32 = 1;
pub const CAP_COMMON_AUTH_SPICE: u32 = 2;
pub const CAP_COMMON_MINI_HEADER: u32 = 3;
pub const CAP_MAIN_AGENT_CONNECTED_TOKENS: u32 = 2;
pub const CAP_PLAYBACK_VOLUME: u32 = 1;

/// Value written into `SpiceLinkAuthMechanism::auth_mechanism` to select
/// SPICE ticket (password) authentication.
pub const LINK_AUTH_MECHANISM_SPICE: u32 = 2;

pub const VD_AGENT_MAX_DATA_SIZE: usize = 2048;
pub const ANNOUNCE_CAPS_MAX_SIZE: usize = 1024;
pub const SPICE_INPUT_MOTION_ACK_BUNCH: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelType {
    Main = 1,
    Display = 2,
    Inputs = 3,
    Cursor = 4,
    Playback = 5,
    Record = 6,
    Tunnel = 7,
    SmartCard = 8,
    UsbRedir = 9,
    Port = 10,
    WebDav = 11,
}

impl From<u8> for ChannelType {
    fn from(value: u8) -> Self {
        match value {
            1 => ChannelType::Main,
            2 => ChannelType::Display,
            3 => ChannelType::Inputs,
            4 => ChannelType::Cursor,
            5 => ChannelType::Playback,
            6 => ChannelType::Record,
            7 => ChannelType::Tunnel,
            8 => ChannelType::SmartCard,
            9 => ChannelType::UsbRedir,
            10 => ChannelType::Port,
            11 => ChannelType::WebDav,
            _ => ChannelType::Main,
        }
    }
}

// ---------------------------------------------------------------------
// Link handshake structures (fixed-size header; capability arrays and the
// RSA-encrypted password are appended by the handshake code directly).
// ---------------------------------------------------------------------

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceLinkHeader {
    pub magic: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub size: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceLinkMess {
    pub connection_id: u32,
    pub channel_type: u8,
    pub channel_id: u8,
    pub num_common_caps: u32,
    pub num_channel_caps: u32,
    pub caps_offset: u32,
}

/// Identical wire shape to [`SpiceLinkHeader`]; the server's reply header.
pub type SpiceLinkReply = SpiceLinkHeader;

#[derive(Debug)]
pub struct SpiceLinkReplyData {
    pub error: u32,
    pub pub_key: Vec<u8>,
    pub num_common_caps: u32,
    pub num_channel_caps: u32,
    pub caps_offset: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceLinkAuthMechanism {
    pub auth_mechanism: u32,
}

// ---------------------------------------------------------------------
// Steady-state mini-header framing.
// ---------------------------------------------------------------------

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMiniDataHeader {
    pub msg_type: u16,
    pub size: u32,
}

// Message types shared by every channel (numbered from 1).
pub mod common {
    pub const MSG_MIGRATE: u16 = 1;
    pub const MSG_MIGRATE_DATA: u16 = 2;
    pub const MSG_SET_ACK: u16 = 3;
    pub const MSG_PING: u16 = 4;
    pub const MSG_WAIT_FOR_CHANNELS: u16 = 5;
    pub const MSG_DISCONNECTING: u16 = 6;
    pub const MSG_NOTIFY: u16 = 7;

    pub const MSGC_ACK_SYNC: u16 = 1;
    pub const MSGC_ACK: u16 = 2;
    pub const MSGC_PONG: u16 = 3;
    pub const MSGC_DISCONNECTING: u16 = 4;
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgSetAck {
    pub generation: u32,
    pub window: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcAckSync {
    pub generation: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgPing {
    pub id: u32,
    pub timestamp: u64,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcPong {
    pub id: u32,
    pub timestamp: u64,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgNotify {
    pub time_stamp: u64,
    pub severity: u32,
    pub visibility: u32,
    pub what: u32,
    pub message_len: u32,
}

// ---------------------------------------------------------------------
// Main channel.
// ---------------------------------------------------------------------

pub mod main {
    pub const MSG_MIGRATE_BEGIN: u16 = 101;
    pub const MSG_MIGRATE_CANCEL: u16 = 102;
    pub const MSG_INIT: u16 = 103;
    pub const MSG_CHANNELS_LIST: u16 = 104;
    pub const MSG_MOUSE_MODE: u16 = 105;
    pub const MSG_MULTI_MEDIA_TIME: u16 = 106;
    pub const MSG_AGENT_CONNECTED: u16 = 107;
    pub const MSG_AGENT_DISCONNECTED: u16 = 108;
    pub const MSG_AGENT_DATA: u16 = 109;
    pub const MSG_AGENT_TOKEN: u16 = 110;
    pub const MSG_AGENT_CONNECTED_TOKENS: u16 = 115;

    pub const MSGC_ATTACH_CHANNELS: u16 = 104;
    pub const MSGC_MOUSE_MODE_REQUEST: u16 = 105;
    pub const MSGC_AGENT_START: u16 = 106;
    pub const MSGC_AGENT_DATA: u16 = 107;
    pub const MSGC_AGENT_TOKEN: u16 = 108;
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgMainInit {
    pub session_id: u32,
    pub display_channels_hint: u32,
    pub supported_mouse_modes: u32,
    pub current_mouse_mode: u32,
    pub agent_connected: u32,
    pub agent_tokens: u32,
    pub multi_media_time: u32,
    pub ram_hint: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgMainMouseMode {
    pub supported_modes: u16,
    pub current_mode: u16,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMainMouseModeRequest {
    pub mouse_mode: u16,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgMainAgentConnectedTokens {
    pub num_tokens: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgMainAgentDisconnected {
    pub error_code: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgMainAgentToken {
    pub num_tokens: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMainAgentStart {
    pub num_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelListEntry {
    pub channel_type: ChannelType,
    pub channel_id: u8,
}

// ---------------------------------------------------------------------
// Inputs channel.
// ---------------------------------------------------------------------

pub mod inputs {
    pub const MSG_INIT: u16 = 101;
    pub const MSG_KEY_MODIFIERS: u16 = 102;
    pub const MSG_MOUSE_MOTION_ACK: u16 = 111;

    pub const MSGC_KEY_DOWN: u16 = 101;
    pub const MSGC_KEY_UP: u16 = 102;
    pub const MSGC_KEY_MODIFIERS: u16 = 103;
    pub const MSGC_MOUSE_MOTION: u16 = 111;
    pub const MSGC_MOUSE_POSITION: u16 = 112;
    pub const MSGC_MOUSE_PRESS: u16 = 113;
    pub const MSGC_MOUSE_RELEASE: u16 = 114;

    pub const BUTTON_LEFT: u32 = 1 << 0;
    pub const BUTTON_MIDDLE: u32 = 1 << 1;
    pub const BUTTON_RIGHT: u32 = 1 << 2;
    pub const BUTTON_WHEEL_UP: u32 = 1 << 3;
    pub const BUTTON_WHEEL_DOWN: u32 = 1 << 4;
    pub const BUTTON_SIDE: u32 = 1 << 5;
    pub const BUTTON_EXTRA: u32 = 1 << 6;

    pub const MODIFIER_SHIFT: u32 = 1 << 0;
    pub const MODIFIER_CTRL: u32 = 1 << 1;
    pub const MODIFIER_ALT: u32 = 1 << 2;
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgInputsInit {
    pub modifiers: u16,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgInputsKeyModifiers {
    pub modifiers: u16,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcKeyDown {
    pub code: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcKeyUp {
    pub code: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcKeyModifiers {
    pub modifiers: u16,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMousePosition {
    pub x: u32,
    pub y: u32,
    pub button_state: u16,
    pub display_id: u8,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMouseMotionEntry {
    pub dx: i32,
    pub dy: i32,
    pub button_state: u16,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgcMouseButton {
    pub button: u8,
    pub button_state: u16,
}

// ---------------------------------------------------------------------
// Playback channel.
// ---------------------------------------------------------------------

pub mod playback {
    pub const MSG_DATA: u16 = 101;
    pub const MSG_MODE: u16 = 102;
    pub const MSG_START: u16 = 103;
    pub const MSG_STOP: u16 = 104;
    pub const MSG_VOLUME: u16 = 105;
    pub const MSG_MUTE: u16 = 106;
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgPlaybackStart {
    pub channels: u32,
    pub frequency: u32,
    pub format: u16,
    pub time: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgPlaybackDataHeader {
    pub time: u32,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgPlaybackVolumeHeader {
    pub nchannels: u8,
}

#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct SpiceMsgPlaybackMute {
    pub mute: u8,
}

pub const SPICE_AUDIO_FMT_S16: u16 = 1;

// ---------------------------------------------------------------------
// VDAgent sub-protocol, carried inside Main-channel AGENT_DATA messages.
// ---------------------------------------------------------------------

pub mod vdagent {
    pub const PROTOCOL_VERSION: u32 = 1;

    pub const MOUSE_STATE: u32 = 1;
    pub const MONITORS_CONFIG: u32 = 2;
    pub const REPLY: u32 = 3;
    pub const CLIPBOARD: u32 = 4;
    pub const DISPLAY_CONFIG: u32 = 5;
    pub const ANNOUNCE_CAPABILITIES: u32 = 6;
    pub const CLIPBOARD_GRAB: u32 = 7;
    pub const CLIPBOARD_REQUEST: u32 = 8;
    pub const CLIPBOARD_RELEASE: u32 = 9;

    pub const CAP_CLIPBOARD_BY_DEMAND: u32 = 5;
    pub const CAP_CLIPBOARD_SELECTION: u32 = 6;

    pub const CLIPBOARD_NONE: u32 = 0;
    pub const CLIPBOARD_UTF8_TEXT: u32 = 1;
    pub const CLIPBOARD_PNG: u32 = 2;
    pub const CLIPBOARD_BMP: u32 = 3;
    pub const CLIPBOARD_TIFF: u32 = 4;
    pub const CLIPBOARD_JPG: u32 = 5;
}

/// Header prefixing every logical VDAgent message (20 bytes, before chunking
/// into `MSGC_MAIN_AGENT_DATA` frames of at most `VD_AGENT_MAX_DATA_SIZE`).
#[derive(Debug, BinRead, BinWrite)]
#[brw(little)]
pub struct VdAgentMessageHeader {
    pub protocol: u32,
    pub msg_type: u32,
    pub opaque: u64,
    pub size: u32,
}
