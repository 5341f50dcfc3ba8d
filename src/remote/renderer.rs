// src/remote/renderer.rs

//! The boundary between the remote surface and the plotting engine.
//!
//! The canvas owns no drawing logic. Everything it needs from the renderer
//! is behind [`Renderer`]: sizing, full-frame rasterization, sub-region
//! extraction for blits, input replay, and out-of-band export. The plotting
//! engine's adapter implements this trait; the surface guarantees that all
//! calls are serialized under the plot lock.

use crate::pixels::PixelRect;
use crate::protocol::{ButtonId, FrameData};
use anyhow::Result;

/// What kind of pointer interaction is being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Press,
    Release,
    DoubleClick,
    Move,
}

/// A pointer interaction forwarded from the local surface.
///
/// Coordinates are device pixels with Y already flipped so 0 is the canvas
/// bottom. `button` is present for everything except `Move`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub x: f64,
    pub y: f64,
    pub button: Option<ButtonId>,
}

/// The drawing target owned by the remote surface.
///
/// Implementations need not be thread-safe beyond `Send`: the surface holds
/// its plot lock across every call, so at most one method runs at a time.
pub trait Renderer: Send {
    /// Set the logical figure size in inches.
    fn set_size_inches(&mut self, width_in: f64, height_in: f64) -> Result<()>;

    /// Current logical figure size in inches.
    fn size_inches(&self) -> (f64, f64);

    /// Current surface size in device pixels.
    fn size_pixels(&self) -> (u32, u32);

    /// Record the host display's DPI so rendering uses matching scale.
    fn set_dpi(&mut self, dpi: f64);

    /// Rasterize the full figure into a raw pixel buffer in the host's
    /// pixel format.
    fn draw(&mut self) -> Result<FrameData>;

    /// Extract `rect` (top-left-origin device pixels) from the current
    /// surface as raw pixel bytes.
    fn extract_region(&mut self, rect: PixelRect) -> Result<Vec<u8>>;

    /// Replay a pointer interaction. Returns `true` if the interaction asks
    /// for a redraw (for example, an interactive selection widget moved).
    fn pointer_event(&mut self, event: PointerEvent) -> Result<bool>;

    /// Export the figure using backend-defined arguments. The surface has
    /// already set the requested logical size and will restore the previous
    /// size afterwards; this call must not touch the interactive buffer.
    fn export(&mut self, args: &serde_json::Value) -> Result<()>;
}
