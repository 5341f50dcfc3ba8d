// src/protocol/mod.rs
//! Message types for the host <-> worker canvas channel.
//!
//! The interactive GUI (local surface) and the analysis worker (remote
//! surface) live in separate processes and exchange exactly these message
//! kinds over a duplex channel. Pixels flow worker -> host (`Draw`, `Blit`);
//! everything else flows host -> worker.
//!
//! ```text
//! Host (local surface)                    Worker (remote surface)
//!   MousePress/Move/Release/DoubleClick --->  replay against renderer
//!   Resize / Print / Dpi               --->  resize / export / set scale
//!   store + repaint                    <---  Draw / Blit
//! ```
//!
//! Routing is by exhaustive `match`: adding a kind is a compile error at
//! every dispatch site until it is handled.

pub mod wire;

/// Identifies which pointer button an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonId {
    Left,
    Middle,
    Right,
    Other(u8),
}

impl ButtonId {
    /// Wire code for this button.
    pub(crate) fn code(self) -> u8 {
        match self {
            ButtonId::Left => 0,
            ButtonId::Middle => 1,
            ButtonId::Right => 2,
            ButtonId::Other(n) => n,
        }
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code {
            0 => ButtonId::Left,
            1 => ButtonId::Middle,
            2 => ButtonId::Right,
            n => ButtonId::Other(n),
        }
    }
}

/// A full-frame pixel buffer.
///
/// `buffer` holds exactly `width * height * 4` bytes, row-major, in the
/// host's [`PixelFormat`](crate::pixels::PixelFormat).
#[derive(Debug, Clone, PartialEq)]
pub struct FrameData {
    pub buffer: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A partial-frame pixel buffer plus its placement rectangle.
///
/// `top` and `left` are in the bottom-left-origin placement system
/// (`top = bottom + height`); see [`crate::pixels`].
#[derive(Debug, Clone, PartialEq)]
pub struct BlitData {
    pub buffer: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub top: i32,
    pub left: i32,
}

/// The closed set of messages carried on the canvas channel.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasMessage {
    /// Full-frame pixel update (worker -> host).
    Draw(FrameData),
    /// Partial-frame pixel update (worker -> host).
    Blit(BlitData),
    /// New logical figure size in inches (host -> worker).
    Resize { width_in: f64, height_in: f64 },
    /// Pointer press at bottom-origin device-pixel coordinates.
    MousePress { x: f64, y: f64, button: ButtonId },
    /// Pointer motion, rate-limited by the local surface.
    MouseMove { x: f64, y: f64 },
    /// Pointer release.
    MouseRelease { x: f64, y: f64, button: ButtonId },
    /// Pointer double-click.
    MouseDoubleClick { x: f64, y: f64, button: ButtonId },
    /// Out-of-band export request; `args` are backend-defined and opaque to
    /// the protocol. Never updates the interactively displayed buffer.
    Print {
        args: serde_json::Value,
        width_in: f64,
        height_in: f64,
    },
    /// Host display DPI, so the worker renders at matching scale.
    Dpi { value: f64 },
}

impl CanvasMessage {
    /// Stable kind name for log messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CanvasMessage::Draw(_) => "Draw",
            CanvasMessage::Blit(_) => "Blit",
            CanvasMessage::Resize { .. } => "Resize",
            CanvasMessage::MousePress { .. } => "MousePress",
            CanvasMessage::MouseMove { .. } => "MouseMove",
            CanvasMessage::MouseRelease { .. } => "MouseRelease",
            CanvasMessage::MouseDoubleClick { .. } => "MouseDoubleClick",
            CanvasMessage::Print { .. } => "Print",
            CanvasMessage::Dpi { .. } => "Dpi",
        }
    }
}
