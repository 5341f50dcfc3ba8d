// src/config.rs

//! Tunables for the canvas channel.
//!
//! Deserializable so an embedding application can carry these in its own
//! configuration file; every field has a default matching the documented
//! protocol behavior, so `CanvasConfig::default()` is the common case.

use crate::protocol::wire;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Minimum interval between outbound sender cycles on the local surface.
    /// Caps pointer-move (and coalesced resize) traffic at roughly
    /// `1000 / move_send_interval_ms` messages per second.
    pub move_send_interval_ms: u64,
    /// Quiet period after the last native resize event before the final
    /// size is forwarded to the worker.
    pub resize_debounce_ms: u64,
    /// Per-frame payload cap enforced by the channel reader.
    pub max_frame_bytes: usize,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            move_send_interval_ms: 100,
            resize_debounce_ms: 200,
            max_frame_bytes: wire::DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl CanvasConfig {
    pub fn move_send_interval(&self) -> Duration {
        Duration::from_millis(self.move_send_interval_ms)
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}
