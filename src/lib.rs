//! Cross-process rendering canvas.
//!
//! The interactive GUI and the analysis engine run in separate processes so
//! long computations never freeze the UI. The pixel surface the user looks
//! at therefore lives in one process while the plotting engine that fills
//! it runs in another; this crate carries rendered pixels one way and user
//! intent the other over a duplex channel.

pub mod channel;
pub mod config;
pub mod local;
pub mod manager;
pub mod pixels;
pub mod protocol;
pub mod remote;
