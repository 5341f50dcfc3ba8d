// src/remote/mod.rs

//! The remote surface: the rendering endpoint in the worker process.
//!
//! Owns the authoritative drawing target and answers the channel. Input and
//! sizing messages arrive from the host, are replayed against the renderer
//! under the plot lock, and rendered pixels travel back as `Draw` (full
//! frame) or `Blit` (damaged region) messages.
//!
//! Two long-lived threads per surface:
//! - `canvas-remote-recv` blocks on the channel and dispatches messages;
//! - `canvas-remote-send` blocks on the update signal and ships the most
//!   recently staged buffer ("latest wins" — intermediate frames that were
//!   replaced before the sender woke are never sent).

pub mod renderer;

use anyhow::{bail, Context, Result};
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::channel::{ChannelReceiver, ChannelSender, ShutdownHandle};
use crate::pixels::{self, PixelRect};
use crate::protocol::{BlitData, CanvasMessage, FrameData};
use self::renderer::{PointerEvent, PointerKind, Renderer};

/// The worker-process half of the canvas.
pub struct RemoteSurface {
    shared: Arc<RemoteShared>,
    shutdown: Option<ShutdownHandle>,
    listener: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

struct RemoteShared {
    /// The plot lock. Held for the full duration of every draw, resize,
    /// input replay, print, and renderer swap.
    renderer: Mutex<Box<dyn Renderer>>,
    /// Staged full frame. Held only around copy-in/copy-out.
    frame: Mutex<Option<FrameData>>,
    /// Staged partial frame, independent of the full-frame lock.
    blit: Mutex<Option<BlitData>>,
    /// Gates whether forwarded input and print requests are replayed.
    process_events: Arc<AtomicBool>,
    signal: UpdateSignal,
    stop: AtomicBool,
}

impl RemoteSurface {
    /// Bind a renderer to a channel endpoint and start both threads.
    pub fn spawn(
        renderer: Box<dyn Renderer>,
        sender: ChannelSender,
        mut receiver: ChannelReceiver,
        process_events: Arc<AtomicBool>,
    ) -> Result<Self> {
        let shutdown = receiver.take_shutdown_handle();
        let shared = Arc::new(RemoteShared {
            renderer: Mutex::new(renderer),
            frame: Mutex::new(None),
            blit: Mutex::new(None),
            process_events,
            signal: UpdateSignal::new(),
            stop: AtomicBool::new(false),
        });

        let listener = thread::Builder::new()
            .name("canvas-remote-recv".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_listener(&shared, receiver)
            })
            .context("Failed to spawn remote listener thread")?;

        let sender_handle = thread::Builder::new()
            .name("canvas-remote-send".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_sender(&shared, &sender)
            })
            .context("Failed to spawn remote sender thread")?;

        Ok(Self {
            shared,
            shutdown,
            listener: Some(listener),
            sender: Some(sender_handle),
        })
    }

    /// Render and stage a full frame. Called by the worker's own plotting
    /// code whenever program-driven drawing has changed the figure.
    pub fn publish(&self) -> Result<()> {
        let mut renderer = self.shared.lock_renderer();
        self.shared.publish_frame(renderer.as_mut())
    }

    /// Extract the damaged rectangle (top-left-origin device pixels) and
    /// stage it as a partial update.
    pub fn publish_region(&self, rect: PixelRect) -> Result<()> {
        let mut renderer = self.shared.lock_renderer();
        self.shared.publish_blit(renderer.as_mut(), rect)
    }

    /// Swap in a new drawing target, carrying over the old one's logical
    /// size. Channel and threads are untouched; used when the application
    /// starts a logically new plot in the same session.
    pub fn replace_renderer(&self, mut next: Box<dyn Renderer>) -> Result<()> {
        let mut renderer = self.shared.lock_renderer();
        let (width_in, height_in) = renderer.size_inches();
        next.set_size_inches(width_in, height_in)
            .context("Failed to transplant figure size onto new drawing target")?;
        *renderer = next;
        debug!("Remote surface rebound to a new drawing target ({}x{} in)", width_in, height_in);
        Ok(())
    }

    /// The shared gate controlling whether forwarded input is replayed.
    pub fn gate(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.process_events)
    }

    /// Run `f` against the renderer under the plot lock. For downstream
    /// consumers outside the canvas protocol (periodic figure snapshotting
    /// for document export, for example).
    pub fn with_renderer<T>(&self, f: impl FnOnce(&mut dyn Renderer) -> T) -> T {
        let mut renderer = self.shared.lock_renderer();
        f(renderer.as_mut())
    }
}

impl Drop for RemoteSurface {
    fn drop(&mut self) {
        self.shared.request_stop();
        if let Some(handle) = &self.shutdown {
            handle.shutdown();
        }
        for (name, handle) in [
            ("listener", self.listener.take()),
            ("sender", self.sender.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!("Remote surface {} thread panicked", name);
                }
            }
        }
        debug!("Remote surface dropped");
    }
}

impl RemoteShared {
    fn lock_renderer(&self) -> MutexGuard<'_, Box<dyn Renderer>> {
        self.renderer.lock().unwrap()
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.signal.wake_all();
    }

    fn handle_message(&self, msg: CanvasMessage) -> Result<()> {
        match msg {
            CanvasMessage::Dpi { value } => {
                self.lock_renderer().set_dpi(value);
                Ok(())
            }
            CanvasMessage::Resize {
                width_in,
                height_in,
            } => {
                let mut renderer = self.lock_renderer();
                renderer
                    .set_size_inches(width_in, height_in)
                    .context("Resize failed")?;
                self.publish_frame(renderer.as_mut())
            }
            CanvasMessage::MousePress { x, y, button } => {
                self.replay_pointer(PointerKind::Press, x, y, Some(button))
            }
            CanvasMessage::MouseRelease { x, y, button } => {
                self.replay_pointer(PointerKind::Release, x, y, Some(button))
            }
            CanvasMessage::MouseDoubleClick { x, y, button } => {
                self.replay_pointer(PointerKind::DoubleClick, x, y, Some(button))
            }
            CanvasMessage::MouseMove { x, y } => {
                self.replay_pointer(PointerKind::Move, x, y, None)
            }
            CanvasMessage::Print {
                args,
                width_in,
                height_in,
            } => {
                if !self.events_enabled() {
                    trace!("Print dropped, event processing is disabled");
                    return Ok(());
                }
                let mut renderer = self.lock_renderer();
                let previous = renderer.size_inches();
                renderer
                    .set_size_inches(width_in, height_in)
                    .context("Failed to set export size")?;
                let exported = renderer.export(&args);
                let restored = renderer.set_size_inches(previous.0, previous.1);
                exported.context("Export failed")?;
                restored.context("Failed to restore figure size after export")?;
                Ok(())
            }
            CanvasMessage::Draw(_) | CanvasMessage::Blit(_) => {
                warn!(
                    "Protocol violation: remote surface received {} (dropped)",
                    msg.kind_name()
                );
                Ok(())
            }
        }
    }

    fn replay_pointer(
        &self,
        kind: PointerKind,
        x: f64,
        y: f64,
        button: Option<crate::protocol::ButtonId>,
    ) -> Result<()> {
        if !self.events_enabled() {
            trace!("Pointer {:?} dropped, event processing is disabled", kind);
            return Ok(());
        }
        let mut renderer = self.lock_renderer();
        let wants_redraw = renderer
            .pointer_event(PointerEvent { kind, x, y, button })
            .context("Pointer replay failed")?;
        if wants_redraw {
            self.publish_frame(renderer.as_mut())?;
        }
        Ok(())
    }

    fn events_enabled(&self) -> bool {
        self.process_events.load(Ordering::Relaxed)
    }

    /// Render a full frame and stage it for the sender. The render runs
    /// under the plot lock the caller already holds; the buffer lock is
    /// scoped to the store alone.
    fn publish_frame(&self, renderer: &mut dyn Renderer) -> Result<()> {
        let frame = renderer.draw().context("Full-frame render failed")?;
        trace!("Staged {}x{} frame", frame.width, frame.height);
        *self.frame.lock().unwrap() = Some(frame);
        self.signal.notify();
        Ok(())
    }

    /// Extract and stage a partial update, recording its placement in the
    /// bottom-left-origin system the wire uses.
    fn publish_blit(&self, renderer: &mut dyn Renderer, rect: PixelRect) -> Result<()> {
        let (_, height_px) = renderer.size_pixels();
        let buffer = renderer
            .extract_region(rect)
            .context("Region extraction failed")?;
        let expected = pixels::buffer_len(rect.width, rect.height);
        if buffer.len() != expected {
            bail!(
                "Renderer returned {} bytes for a {}x{} region ({} expected)",
                buffer.len(),
                rect.width,
                rect.height,
                expected
            );
        }
        let blit = BlitData {
            buffer,
            width: rect.width,
            height: rect.height,
            top: pixels::flip_blit_top(rect.y as i32, height_px),
            left: rect.x as i32,
        };
        trace!(
            "Staged {}x{} blit at top={} left={}",
            blit.width,
            blit.height,
            blit.top,
            blit.left
        );
        *self.blit.lock().unwrap() = Some(blit);
        self.signal.notify();
        Ok(())
    }
}

fn run_listener(shared: &Arc<RemoteShared>, mut receiver: ChannelReceiver) {
    debug!("canvas-remote-recv starting");
    loop {
        match receiver.recv() {
            Ok(Some(msg)) => {
                let kind = msg.kind_name();
                trace!("canvas-remote-recv: {}", kind);
                if let Err(e) = shared.handle_message(msg) {
                    // A failed handler must not take the worker down; the
                    // next successful draw resynchronizes the host.
                    error!(
                        "{}: {} handler failed: {:#}",
                        thread_name(),
                        kind,
                        e
                    );
                }
            }
            Ok(None) => {
                info!("{}: peer closed the channel, stopping", thread_name());
                break;
            }
            Err(e) => {
                error!("{}: unrecoverable protocol error: {:#}", thread_name(), e);
                break;
            }
        }
    }
    // The sender cannot outlive the connection.
    shared.request_stop();
    debug!("canvas-remote-recv stopped");
}

fn run_sender(shared: &Arc<RemoteShared>, sender: &ChannelSender) {
    debug!("canvas-remote-send starting");
    while shared.signal.wait(&shared.stop) {
        // Latest wins: a pending blit is sent (and cleared) in preference
        // to the full frame; exactly one send per wake-and-clear cycle.
        let msg = {
            let pending = take_blit(&shared.blit);
            match pending {
                Some(blit) => CanvasMessage::Blit(blit),
                None => match shared.frame.lock().unwrap().clone() {
                    Some(frame) => CanvasMessage::Draw(frame),
                    None => continue,
                },
            }
        };
        if let Err(e) = sender.send(&msg) {
            info!("{}: channel closed, stopping: {:#}", thread_name(), e);
            break;
        }
    }
    debug!("canvas-remote-send stopped");
}

fn take_blit(slot: &Mutex<Option<BlitData>>) -> Option<BlitData> {
    slot.lock().unwrap().take()
}

fn thread_name() -> String {
    thread::current().name().unwrap_or("<unnamed>").to_string()
}

/// Doorbell between the publish paths and the sender thread.
struct UpdateSignal {
    dirty: Mutex<bool>,
    ready: Condvar,
}

impl UpdateSignal {
    fn new() -> Self {
        Self {
            dirty: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    fn notify(&self) {
        *self.dirty.lock().unwrap() = true;
        self.ready.notify_one();
    }

    fn wake_all(&self) {
        self.ready.notify_all();
    }

    /// Block until new data is staged. Returns `false` once stop is
    /// requested; consumes the dirty flag otherwise.
    fn wait(&self, stop: &AtomicBool) -> bool {
        let mut dirty = self.dirty.lock().unwrap();
        loop {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            if *dirty {
                *dirty = false;
                return true;
            }
            dirty = self.ready.wait(dirty).unwrap();
        }
    }
}
