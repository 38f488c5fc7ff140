//! # spice-client
//!
//! A pure Rust implementation of a SPICE (Simple Protocol for Independent Computing
//! Environments) client, covering the Main, Inputs, and Playback channels plus the
//! VDAgent clipboard sub-protocol carried over Main.
//!
//! ## Features
//!
//! - **Pure Rust** - no C dependencies
//! - **Async/await** - built on Tokio
//! - **TCP and UNIX socket transports**
//! - **Keyboard and mouse injection** - the Inputs channel
//! - **Clipboard sharing** - VDAgent clipboard grab/release/request/data
//! - **Audio playback** - the Playback channel, delivered via caller-registered callbacks
//! - **Authentication** - RSA-OAEP (SPICE ticket) authentication
//!
//! ## Quick Start
//!
//! ```no_run
//! use spice_client::ClientBuilder;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), spice_client::SpiceError> {
//!     let session = ClientBuilder::new("spice://localhost:5900")
//!         .with_password("secret")
//!         .build();
//!
//!     session.connect().await?;
//!     session.mouse_motion(10, 0).await?;
//!     session.process(Duration::from_secs(1)).await;
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`session`** - `Session`/`ClientBuilder`, the public async API and the
//!   per-channel background read loops
//! - **`channel`** - the shared link handshake and common-message dispatch
//! - **`channels`** - Main, Inputs, and Playback channel-specific dispatch
//! - **`agent`** - the VDAgent clipboard sub-protocol
//! - **`protocol`** - wire message definitions (`binrw`)
//! - **`wire`** - mini-header framing primitives
//! - **`transport`** - TCP/UNIX socket abstraction
//! - **`auth`** - SPICE ticket (RSA-OAEP) password encryption
//! - **`error`** - error types
//!
//! ## Non-goals
//!
//! This crate does not implement the Display, Cursor, or Record channels, nor
//! video decoding, migration, or TLS.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod agent;
pub mod auth;
pub mod channel;
pub mod channels;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod wire;

pub use agent::{ClipboardCallbacks, ClipboardNoticePolicy, DataType};
pub use channels::{MouseButton, PlaybackCallbacks, SampleFormat};
pub use error::{Result, SpiceError};
pub use session::{ClientBuilder, Session};
