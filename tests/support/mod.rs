// tests/support/mod.rs

//! Shared fakes for the integration tests: a scriptable renderer whose
//! pixels are predictable, a repaint-counting window host, and a painter
//! that composites into an in-memory canvas.

use anyhow::{bail, Result};
use cytocanvas::local::host::{FramePainter, WindowHost};
use cytocanvas::pixels::{self, PixelFormat, PixelRect};
use cytocanvas::protocol::FrameData;
use cytocanvas::remote::renderer::{PointerEvent, Renderer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Pixel value the fake renderer produces at `(col, row)`. Coordinate-coded
/// so that misplaced blits are visible in the composited output.
pub fn pattern_pixel(col: u32, row: u32) -> [u8; 4] {
    [col as u8, row as u8, 0xc0, 0xff]
}

/// The full coordinate-coded frame for a `width` x `height` surface.
pub fn pattern_frame(width: u32, height: u32) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(pixels::buffer_len(width, height));
    for row in 0..height {
        for col in 0..width {
            buffer.extend_from_slice(&pattern_pixel(col, row));
        }
    }
    buffer
}

/// Observable state of a [`TestRenderer`], shared with the test body.
pub struct RendererState {
    pub size_in: Mutex<(f64, f64)>,
    pub size_px: Mutex<(u32, u32)>,
    pub dpi: Mutex<f64>,
    pub events: Mutex<Vec<PointerEvent>>,
    pub exports: Mutex<Vec<serde_json::Value>>,
    /// Whether replayed input reports that it wants a redraw.
    pub redraw_on_input: AtomicBool,
    pub draws: AtomicUsize,
    /// Set while any renderer method runs; used to detect overlapping
    /// critical sections, which the plot lock must make impossible.
    in_call: AtomicBool,
    pub overlaps: AtomicUsize,
    /// Artificial widening of every renderer call's critical section.
    pub call_delay: Mutex<Duration>,
}

impl RendererState {
    fn enter(&self) -> CallGuard<'_> {
        if self.in_call.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let delay = *self.call_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        CallGuard { state: self }
    }
}

struct CallGuard<'a> {
    state: &'a RendererState,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.state.in_call.store(false, Ordering::SeqCst);
    }
}

/// Fake plotting engine producing coordinate-coded pixels.
pub struct TestRenderer {
    pub state: Arc<RendererState>,
}

impl TestRenderer {
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            state: Arc::new(RendererState {
                size_in: Mutex::new((6.4, 4.8)),
                size_px: Mutex::new((width_px, height_px)),
                dpi: Mutex::new(0.0),
                events: Mutex::new(Vec::new()),
                exports: Mutex::new(Vec::new()),
                redraw_on_input: AtomicBool::new(false),
                draws: AtomicUsize::new(0),
                in_call: AtomicBool::new(false),
                overlaps: AtomicUsize::new(0),
                call_delay: Mutex::new(Duration::ZERO),
            }),
        }
    }
}

impl Renderer for TestRenderer {
    fn set_size_inches(&mut self, width_in: f64, height_in: f64) -> Result<()> {
        let _guard = self.state.enter();
        *self.state.size_in.lock().unwrap() = (width_in, height_in);
        Ok(())
    }

    fn size_inches(&self) -> (f64, f64) {
        *self.state.size_in.lock().unwrap()
    }

    fn size_pixels(&self) -> (u32, u32) {
        *self.state.size_px.lock().unwrap()
    }

    fn set_dpi(&mut self, dpi: f64) {
        *self.state.dpi.lock().unwrap() = dpi;
    }

    fn draw(&mut self) -> Result<FrameData> {
        let _guard = self.state.enter();
        let (width, height) = *self.state.size_px.lock().unwrap();
        self.state.draws.fetch_add(1, Ordering::SeqCst);
        Ok(FrameData {
            buffer: pattern_frame(width, height),
            width,
            height,
        })
    }

    fn extract_region(&mut self, rect: PixelRect) -> Result<Vec<u8>> {
        let _guard = self.state.enter();
        let (width, height) = *self.state.size_px.lock().unwrap();
        if rect.x + rect.width > width || rect.y + rect.height > height {
            bail!("Region {:?} exceeds the {}x{} surface", rect, width, height);
        }
        let mut buffer = Vec::with_capacity(pixels::buffer_len(rect.width, rect.height));
        for row in rect.y..rect.y + rect.height {
            for col in rect.x..rect.x + rect.width {
                buffer.extend_from_slice(&pattern_pixel(col, row));
            }
        }
        Ok(buffer)
    }

    fn pointer_event(&mut self, event: PointerEvent) -> Result<bool> {
        let _guard = self.state.enter();
        self.state.events.lock().unwrap().push(event);
        Ok(self.state.redraw_on_input.load(Ordering::SeqCst))
    }

    fn export(&mut self, args: &serde_json::Value) -> Result<()> {
        let _guard = self.state.enter();
        self.state.exports.lock().unwrap().push(args.clone());
        Ok(())
    }
}

/// Window host that only counts repaint requests.
pub struct TestHost {
    repaints: AtomicUsize,
}

impl TestHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            repaints: AtomicUsize::new(0),
        })
    }

    pub fn repaints(&self) -> usize {
        self.repaints.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` repaints were requested.
    pub fn await_repaints(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.repaints() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

/// Boxable [`WindowHost`] that shares a [`TestHost`]'s repaint counter.
/// The orphan rule forbids `impl WindowHost for Arc<TestHost>` from the
/// test crate (foreign trait on the foreign `Arc` type), so the surface is
/// handed this wrapper while the test keeps its own `Arc<TestHost>` handle.
pub struct HostHandle(pub Arc<TestHost>);

impl WindowHost for HostHandle {
    fn request_repaint(&self) {
        self.0.repaints.fetch_add(1, Ordering::SeqCst);
    }
}

/// Painter compositing into an in-memory RGBA-width canvas, top-left
/// origin, 4 bytes per pixel like the wire buffers.
pub struct CanvasPainter {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
    pub erases: usize,
}

impl CanvasPainter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bytes: vec![0; pixels::buffer_len(width, height)],
            erases: 0,
        }
    }
}

impl FramePainter for CanvasPainter {
    fn erase(&mut self) {
        self.erases += 1;
        self.bytes.fill(0);
    }

    fn draw_image(
        &mut self,
        buffer: &[u8],
        width: u32,
        height: u32,
        left: i32,
        top: i32,
        _format: PixelFormat,
    ) -> Result<()> {
        for row in 0..height {
            let dst_row = top + row as i32;
            if dst_row < 0 || dst_row >= self.height as i32 {
                continue;
            }
            for col in 0..width {
                let dst_col = left + col as i32;
                if dst_col < 0 || dst_col >= self.width as i32 {
                    continue;
                }
                let src = (row * width + col) as usize * 4;
                let dst = (dst_row as u32 * self.width + dst_col as u32) as usize * 4;
                self.bytes[dst..dst + 4].copy_from_slice(&buffer[src..src + 4]);
            }
        }
        Ok(())
    }
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
