// src/local/host.rs

//! Seams to the host windowing toolkit.
//!
//! The local surface never talks to a widget directly. The embedding
//! toolkit adapter implements these two traits and drives
//! [`LocalSurface::paint`](crate::local::LocalSurface::paint) from its own
//! paint cycle.

use crate::pixels::PixelFormat;
use anyhow::Result;

/// The toolkit-side owner of the drawable widget.
pub trait WindowHost: Send + Sync {
    /// Invalidate the canvas region and schedule a repaint on the toolkit's
    /// drawing cycle. Called from the listener thread; implementations must
    /// not paint here, only schedule.
    fn request_repaint(&self);
}

/// One paint pass over the widget, handed to
/// [`LocalSurface::paint`](crate::local::LocalSurface::paint) by the
/// toolkit's paint callback.
pub trait FramePainter {
    /// Clear the widget rectangle before a full-frame draw.
    fn erase(&mut self);

    /// Decode `buffer` (raw pixels in `format`) and draw it with its
    /// top-left corner at `(left, top)` in widget coordinates.
    fn draw_image(
        &mut self,
        buffer: &[u8],
        width: u32,
        height: u32,
        left: i32,
        top: i32,
        format: PixelFormat,
    ) -> Result<()>;
}
