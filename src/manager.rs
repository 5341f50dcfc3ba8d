// src/manager.rs

//! One live remote surface per worker process.
//!
//! The analysis session opens logically distinct plots over its lifetime,
//! but the transport is negotiated once: the first `new_plot` binds the
//! channel and starts the surface threads, and every later `new_plot` only
//! swaps the drawing target (carrying over its logical size). Channel,
//! locks, and threads are never torn down or recreated between plots.

use anyhow::{bail, Result};
use log::debug;
use once_cell::sync::Lazy;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::remote::renderer::Renderer;
use crate::remote::RemoteSurface;

static GLOBAL: Lazy<SurfaceManager> = Lazy::new(SurfaceManager::new);

/// Registry owning the process's single remote surface slot.
pub struct SurfaceManager {
    slot: Mutex<Slot>,
}

enum Slot {
    /// No channel installed yet.
    Idle,
    /// Channel installed, no surface bound yet.
    Connected {
        sender: ChannelSender,
        receiver: ChannelReceiver,
        gate: Arc<AtomicBool>,
    },
    /// Surface live; reused for every subsequent plot.
    Live(Arc<RemoteSurface>),
}

impl SurfaceManager {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// The process-wide registry instance.
    pub fn global() -> &'static SurfaceManager {
        &GLOBAL
    }

    /// Install the channel endpoints and the shared event-processing gate.
    /// Called once at worker startup, before the first plot.
    pub fn connect(
        &self,
        sender: ChannelSender,
        receiver: ChannelReceiver,
        gate: Arc<AtomicBool>,
    ) -> Result<()> {
        let mut slot = self.slot.lock().unwrap();
        match *slot {
            Slot::Idle => {
                *slot = Slot::Connected {
                    sender,
                    receiver,
                    gate,
                };
                Ok(())
            }
            Slot::Connected { .. } | Slot::Live(_) => {
                bail!("Surface manager is already connected")
            }
        }
    }

    /// Create-or-replace the logical plot.
    ///
    /// First call: binds the remote surface to the installed channel and
    /// starts its threads. Later calls: the existing surface adopts the new
    /// drawing target, which inherits the previous one's logical size.
    pub fn new_plot(&self, renderer: Box<dyn Renderer>) -> Result<Arc<RemoteSurface>> {
        let mut slot = self.slot.lock().unwrap();
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Idle => bail!("Surface manager has no channel; call connect first"),
            Slot::Connected {
                sender,
                receiver,
                gate,
            } => {
                debug!("Binding remote surface for first plot");
                let surface =
                    Arc::new(RemoteSurface::spawn(renderer, sender, receiver, gate)?);
                *slot = Slot::Live(Arc::clone(&surface));
                Ok(surface)
            }
            Slot::Live(surface) => {
                debug!("Rebinding live remote surface to a new plot");
                *slot = Slot::Live(Arc::clone(&surface));
                surface.replace_renderer(renderer)?;
                Ok(surface)
            }
        }
    }

    /// The live surface, if a plot has been bound.
    pub fn surface(&self) -> Option<Arc<RemoteSurface>> {
        match &*self.slot.lock().unwrap() {
            Slot::Live(surface) => Some(Arc::clone(surface)),
            _ => None,
        }
    }
}

impl Default for SurfaceManager {
    fn default() -> Self {
        Self::new()
    }
}
