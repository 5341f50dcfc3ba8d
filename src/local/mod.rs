// src/local/mod.rs

//! The local surface: the display endpoint in the GUI process.
//!
//! Owns nothing but the most recently received pixel buffers. Incoming
//! `Draw`/`Blit` messages are stored and a repaint is scheduled through the
//! host toolkit; painting itself is a pure function of the stored state, so
//! the toolkit may invoke it whenever and however often it likes.
//!
//! Outbound traffic is shaped:
//! - press/release/double-click are forwarded immediately;
//! - pointer moves and the debounced final resize are latest-value-wins
//!   fields drained by the `canvas-local-send` thread, which sleeps a
//!   minimum interval between cycles to cap the message rate;
//! - a burst of native resize events becomes one `Resize` message, sent a
//!   quiet period after the burst ends.

pub mod debounce;
pub mod host;

use anyhow::{Context, Result};
use log::{debug, info, trace, warn, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::{ChannelReceiver, ChannelSender, ShutdownHandle};
use crate::config::CanvasConfig;
use crate::pixels::{self, PixelFormat};
use crate::protocol::{BlitData, ButtonId, CanvasMessage, FrameData};
use self::debounce::DebounceTimer;
use self::host::{FramePainter, WindowHost};

/// The GUI-process half of the canvas.
pub struct LocalSurface {
    shared: Arc<LocalShared>,
    tx: ChannelSender,
    debounce: DebounceTimer,
    shutdown: Option<ShutdownHandle>,
    listener: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

struct LocalShared {
    host: Box<dyn WindowHost>,
    /// Pixel byte order, fixed at construction from the host platform.
    format: PixelFormat,
    /// Stored buffers: written by the listener thread, read by the
    /// toolkit's paint callback. The mutex is the handoff point; it is held
    /// only to store or load, never while painting or decoding.
    display: Mutex<DisplayState>,
    /// Latest-value-wins outbound fields for the sender thread.
    outbound: Mutex<OutboundState>,
    outbound_changed: Condvar,
    /// Widget geometry for Y flips and pixel-to-inch conversion.
    geometry: Mutex<Geometry>,
    stop: AtomicBool,
}

#[derive(Default)]
struct DisplayState {
    frame: Option<Arc<FrameData>>,
    blit: Option<BlitData>,
}

#[derive(Default)]
struct OutboundState {
    pending_move: Option<(f64, f64)>,
    pending_resize: Option<(f64, f64)>,
}

struct Geometry {
    width_px: f64,
    height_px: f64,
    dpi: f64,
}

impl LocalSurface {
    /// Bind a host widget to a channel endpoint and start both threads.
    ///
    /// Sends the host display's DPI to the worker immediately so the first
    /// render already uses the right scale.
    pub fn spawn(
        host: Box<dyn WindowHost>,
        sender: ChannelSender,
        mut receiver: ChannelReceiver,
        dpi: f64,
        config: &CanvasConfig,
    ) -> Result<Self> {
        let shutdown = receiver.take_shutdown_handle();
        let shared = Arc::new(LocalShared {
            host,
            format: PixelFormat::host(),
            display: Mutex::new(DisplayState::default()),
            outbound: Mutex::new(OutboundState::default()),
            outbound_changed: Condvar::new(),
            geometry: Mutex::new(Geometry {
                width_px: 0.0,
                height_px: 0.0,
                dpi,
            }),
            stop: AtomicBool::new(false),
        });

        sender
            .send(&CanvasMessage::Dpi { value: dpi })
            .context("Failed to announce display DPI")?;

        let listener = thread::Builder::new()
            .name("canvas-local-recv".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_listener(&shared, receiver)
            })
            .context("Failed to spawn local listener thread")?;

        let sender_handle = thread::Builder::new()
            .name("canvas-local-send".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                let tx = sender.clone();
                let interval = config.move_send_interval();
                move || run_sender(&shared, &tx, interval)
            })
            .context("Failed to spawn local sender thread")?;

        let debounce = DebounceTimer::new(config.resize_debounce(), {
            let shared = Arc::clone(&shared);
            Box::new(move || shared.queue_final_resize())
        })?;

        Ok(Self {
            shared,
            tx: sender,
            debounce,
            shutdown,
            listener: Some(listener),
            sender: Some(sender_handle),
        })
    }

    /// Paint the widget from the stored buffers. Safe to call any number of
    /// times from the toolkit's paint cycle; paints nothing until the first
    /// full frame has arrived.
    pub fn paint(&self, painter: &mut dyn FramePainter) -> Result<()> {
        let (frame_to_draw, blit_to_draw) = {
            let mut display = self.shared.display.lock().unwrap();
            let Some(frame) = display.frame.as_ref().map(Arc::clone) else {
                return Ok(());
            };
            // A pending blit paints exactly once.
            (frame, display.blit.take())
        };

        match blit_to_draw {
            Some(blit) => {
                let row = pixels::flip_blit_top(blit.top, frame_to_draw.height);
                painter
                    .draw_image(
                        &blit.buffer,
                        blit.width,
                        blit.height,
                        blit.left,
                        row,
                        self.shared.format,
                    )
                    .context("Failed to paint partial frame")?;
            }
            None => {
                painter.erase();
                painter
                    .draw_image(
                        &frame_to_draw.buffer,
                        frame_to_draw.width,
                        frame_to_draw.height,
                        0,
                        0,
                        self.shared.format,
                    )
                    .context("Failed to paint full frame")?;
            }
        }
        Ok(())
    }

    /// Forward a pointer press immediately.
    pub fn pointer_pressed(&self, x: f64, y: f64, button: ButtonId) -> Result<()> {
        let y = self.shared.flip_y(y);
        self.tx.send(&CanvasMessage::MousePress { x, y, button })
    }

    /// Forward a pointer release immediately.
    pub fn pointer_released(&self, x: f64, y: f64, button: ButtonId) -> Result<()> {
        let y = self.shared.flip_y(y);
        self.tx.send(&CanvasMessage::MouseRelease { x, y, button })
    }

    /// Forward a double-click immediately.
    pub fn pointer_double_clicked(&self, x: f64, y: f64, button: ButtonId) -> Result<()> {
        let y = self.shared.flip_y(y);
        self.tx.send(&CanvasMessage::MouseDoubleClick { x, y, button })
    }

    /// Record pointer motion. The latest position is sent by the rate-
    /// limited sender thread; intermediate positions are dropped.
    pub fn pointer_moved(&self, x: f64, y: f64) {
        let y = self.shared.flip_y(y);
        let mut outbound = self.shared.outbound.lock().unwrap();
        outbound.pending_move = Some((x, y));
        drop(outbound);
        self.shared.outbound_changed.notify_one();
    }

    /// Handle a native resize event: track the new geometry for coordinate
    /// conversion and restart the quiet-period timer. The worker sees one
    /// `Resize` per burst, after the burst ends.
    pub fn resized(&self, width_px: f64, height_px: f64) {
        {
            let mut geometry = self.shared.geometry.lock().unwrap();
            geometry.width_px = width_px;
            geometry.height_px = height_px;
        }
        self.debounce.restart();
    }

    /// Announce a DPI change (monitor hop, scale-factor change).
    pub fn set_dpi(&self, dpi: f64) -> Result<()> {
        self.shared.geometry.lock().unwrap().dpi = dpi;
        self.tx.send(&CanvasMessage::Dpi { value: dpi })
    }

    /// Fire-and-forget export request.
    pub fn print(&self, args: serde_json::Value, width_in: f64, height_in: f64) -> Result<()> {
        self.tx.send(&CanvasMessage::Print {
            args,
            width_in,
            height_in,
        })
    }

    /// Pixel byte order this surface decodes with.
    pub fn pixel_format(&self) -> PixelFormat {
        self.shared.format
    }
}

impl Drop for LocalSurface {
    fn drop(&mut self) {
        self.debounce.cancel();
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.outbound_changed.notify_all();
        if let Some(handle) = &self.shutdown {
            handle.shutdown();
        }
        for (name, handle) in [
            ("listener", self.listener.take()),
            ("sender", self.sender.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!("Local surface {} thread panicked", name);
                }
            }
        }
        debug!("Local surface dropped");
    }
}

impl LocalShared {
    fn flip_y(&self, y: f64) -> f64 {
        let height_px = self.geometry.lock().unwrap().height_px;
        pixels::flip_pointer_y(y, height_px)
    }

    /// Debounce action: convert the settled pixel size to inches and queue
    /// it for the sender thread.
    fn queue_final_resize(&self) {
        let (width_in, height_in) = {
            let geometry = self.geometry.lock().unwrap();
            if geometry.dpi <= 0.0 {
                warn!("Resize dropped: display DPI is not set");
                return;
            }
            (
                geometry.width_px / geometry.dpi,
                geometry.height_px / geometry.dpi,
            )
        };
        trace!("Queueing settled resize {}x{} in", width_in, height_in);
        let mut outbound = self.outbound.lock().unwrap();
        outbound.pending_resize = Some((width_in, height_in));
        drop(outbound);
        self.outbound_changed.notify_one();
    }
}

fn run_listener(shared: &Arc<LocalShared>, mut receiver: ChannelReceiver) {
    debug!("canvas-local-recv starting");
    loop {
        match receiver.recv() {
            Ok(Some(CanvasMessage::Draw(frame))) => {
                trace!("canvas-local-recv: {}x{} frame", frame.width, frame.height);
                {
                    let mut display = shared.display.lock().unwrap();
                    display.frame = Some(Arc::new(frame));
                    // A fresh full frame invalidates any stale partial.
                    display.blit = None;
                }
                shared.host.request_repaint();
            }
            Ok(Some(CanvasMessage::Blit(blit))) => {
                trace!(
                    "canvas-local-recv: {}x{} blit at top={} left={}",
                    blit.width,
                    blit.height,
                    blit.top,
                    blit.left
                );
                shared.display.lock().unwrap().blit = Some(blit);
                shared.host.request_repaint();
            }
            Ok(Some(other)) => {
                warn!(
                    "Protocol violation: local surface received {} (dropped)",
                    other.kind_name()
                );
            }
            Ok(None) => {
                info!("canvas-local-recv: peer closed the channel, stopping");
                break;
            }
            Err(e) => {
                error!("canvas-local-recv: unrecoverable protocol error: {:#}", e);
                break;
            }
        }
    }
    debug!("canvas-local-recv stopped");
}

fn run_sender(shared: &Arc<LocalShared>, tx: &ChannelSender, interval: Duration) {
    debug!("canvas-local-send starting");
    while let Some((pending_move, pending_resize)) = wait_outbound(shared) {
        if let Some((width_in, height_in)) = pending_resize {
            if tx
                .send(&CanvasMessage::Resize {
                    width_in,
                    height_in,
                })
                .is_err()
            {
                info!("canvas-local-send: channel closed, stopping");
                break;
            }
        }
        if let Some((x, y)) = pending_move {
            if tx.send(&CanvasMessage::MouseMove { x, y }).is_err() {
                info!("canvas-local-send: channel closed, stopping");
                break;
            }
        }
        // Rate limit: nothing else leaves this thread until the interval
        // has passed; newer values overwrite the pending fields meanwhile.
        thread::sleep(interval);
    }
    debug!("canvas-local-send stopped");
}

/// Block until an outbound value is pending. Returns `None` on stop.
#[allow(clippy::type_complexity)]
fn wait_outbound(shared: &LocalShared) -> Option<(Option<(f64, f64)>, Option<(f64, f64)>)> {
    let mut outbound = shared.outbound.lock().unwrap();
    loop {
        if shared.stop.load(Ordering::Relaxed) {
            return None;
        }
        if outbound.pending_move.is_some() || outbound.pending_resize.is_some() {
            return Some((outbound.pending_move.take(), outbound.pending_resize.take()));
        }
        outbound = shared.outbound_changed.wait(outbound).unwrap();
    }
}
