// src/channel.rs

//! Duplex transport between the host (GUI) process and the worker
//! (analysis) process.
//!
//! The transport is a Unix stream socketpair: reliable, ordered, and
//! bidirectional. One end lives in each process; each end is split into a
//! cloneable sending half and a blocking receiving half. A frame is written
//! under a single lock acquisition, so concurrent senders in one process
//! (the UI thread sending a click, the sender thread flushing a move) can
//! never interleave partial frames on the stream.

use anyhow::{bail, Context, Result};
use std::ffi::CString;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

use nix::sys::signal::{kill, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};

use crate::config::CanvasConfig;
use crate::protocol::{wire, CanvasMessage};

/// Environment variable naming the channel descriptor in the worker process.
pub const CHANNEL_FD_ENV: &str = "CYTOCANVAS_CHANNEL_FD";

/// Descriptor the worker's channel end is `dup2`ed to before exec.
const WORKER_CHANNEL_FD: RawFd = 3;

/// Sending half of a channel endpoint.
///
/// Cloneable; all clones share one writer, and each [`send`](Self::send)
/// writes and flushes exactly one complete frame under the shared lock.
#[derive(Clone)]
pub struct ChannelSender {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ChannelSender {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one message as an atomic frame.
    pub fn send(&self, msg: &CanvasMessage) -> Result<()> {
        let mut writer = self.writer.lock().unwrap();
        wire::write_message(&mut *writer, msg)
            .with_context(|| format!("Failed to send {} message", msg.kind_name()))?;
        writer.flush().context("Failed to flush channel")?;
        log::trace!("Channel: sent {}", msg.kind_name());
        Ok(())
    }
}

/// Handle for unblocking a listener parked in [`ChannelReceiver::recv`].
///
/// Shutting the socket down makes the blocked read return end-of-stream,
/// which the listener treats as a clean peer close.
pub struct ShutdownHandle(UnixStream);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

/// Receiving half of a channel endpoint. Blocks until a complete message is
/// available or the channel closes.
pub struct ChannelReceiver {
    reader: Box<dyn Read + Send>,
    max_payload: usize,
    shutdown: Option<ShutdownHandle>,
}

impl ChannelReceiver {
    pub fn new(reader: Box<dyn Read + Send>, max_payload: usize) -> Self {
        Self {
            reader,
            max_payload,
            shutdown: None,
        }
    }

    /// Block until the next message. `Ok(None)` means the peer closed the
    /// channel; any decode failure is fatal to the stream.
    pub fn recv(&mut self) -> Result<Option<CanvasMessage>> {
        wire::read_message(&mut self.reader, self.max_payload)
    }

    /// Detach the shutdown handle, if this receiver wraps a socket.
    pub fn take_shutdown_handle(&mut self) -> Option<ShutdownHandle> {
        self.shutdown.take()
    }
}

/// Split one stream into a channel endpoint.
pub fn endpoints(stream: UnixStream, config: &CanvasConfig) -> Result<(ChannelSender, ChannelReceiver)> {
    let writer = stream
        .try_clone()
        .context("Failed to clone stream for channel writer")?;
    let shutdown = stream
        .try_clone()
        .context("Failed to clone stream for shutdown handle")?;
    let mut receiver = ChannelReceiver::new(Box::new(stream), config.max_frame_bytes);
    receiver.shutdown = Some(ShutdownHandle(shutdown));
    Ok((ChannelSender::new(Box::new(writer)), receiver))
}

/// Two connected endpoints in one process. Used by tests and by embeddings
/// that run the "worker" on a thread instead of a separate process.
pub fn pair(
    config: &CanvasConfig,
) -> Result<(
    (ChannelSender, ChannelReceiver),
    (ChannelSender, ChannelReceiver),
)> {
    let (a, b) = UnixStream::pair().context("Failed to create socketpair")?;
    Ok((endpoints(a, config)?, endpoints(b, config)?))
}

/// Configuration for spawning a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig<'a> {
    /// The executable to run.
    pub command_executable: &'a str,
    /// Arguments to the executable.
    pub args: &'a [&'a str],
}

/// Parent-side handle to a spawned worker process and its channel socket.
///
/// The channel's lifetime is the worker's lifetime: dropping the link reaps
/// the child, and the child exiting closes the stream.
pub struct WorkerLink {
    stream: UnixStream,
    child_pid: Option<Pid>,
}

impl WorkerLink {
    /// Forks a worker process connected to this process by a socketpair.
    ///
    /// The child's end is `dup2`ed to a stable descriptor, published in
    /// [`CHANNEL_FD_ENV`], and inherited across `execvp`; the worker side
    /// recovers it with [`WorkerLink::from_env`].
    pub fn spawn(config: &WorkerConfig) -> Result<Self> {
        let (parent_fd, child_fd) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .context("Failed to create worker socketpair")?;

        match unsafe { fork() }.context("Failed to fork worker process")? {
            ForkResult::Parent { child, .. } => {
                drop(child_fd);
                log::debug!(
                    "Spawned canvas worker with PID {}, channel FD {}",
                    child,
                    parent_fd.as_raw_fd()
                );
                Ok(WorkerLink {
                    stream: UnixStream::from(parent_fd),
                    child_pid: Some(child),
                })
            }
            ForkResult::Child => {
                drop(parent_fd);

                let raw = child_fd.as_raw_fd();
                if raw == WORKER_CHANNEL_FD {
                    // Already at the target descriptor; keep it open across exec.
                    std::mem::forget(child_fd);
                } else {
                    if unsafe { libc::dup2(raw, WORKER_CHANNEL_FD) } == -1 {
                        eprintln!(
                            "canvas worker setup: dup2 of channel fd failed: {}",
                            std::io::Error::last_os_error()
                        );
                        std::process::exit(1);
                    }
                    drop(child_fd);
                }
                std::env::set_var(CHANNEL_FD_ENV, WORKER_CHANNEL_FD.to_string());

                let command_cst = match CString::new(config.command_executable) {
                    Ok(c) => c,
                    Err(_) => {
                        eprintln!("canvas worker setup: command contains NUL byte");
                        std::process::exit(1);
                    }
                };
                let mut args_cst = vec![command_cst.clone()];
                for arg in config.args {
                    match CString::new(*arg) {
                        Ok(c) => args_cst.push(c),
                        Err(_) => {
                            eprintln!("canvas worker setup: argument contains NUL byte");
                            std::process::exit(1);
                        }
                    }
                }

                let exec_err = execvp(&command_cst, &args_cst).unwrap_err();
                eprintln!(
                    "canvas worker setup: failed to execute {:?}: {}",
                    command_cst, exec_err
                );
                std::process::exit(1);
            }
        }
    }

    /// Worker-side bootstrap: adopt the channel descriptor published by the
    /// parent in [`CHANNEL_FD_ENV`].
    pub fn from_env() -> Result<Self> {
        let value = std::env::var(CHANNEL_FD_ENV)
            .with_context(|| format!("{} is not set; not launched as a canvas worker?", CHANNEL_FD_ENV))?;
        let fd: RawFd = value
            .parse()
            .with_context(|| format!("{} does not hold a descriptor number: {:?}", CHANNEL_FD_ENV, value))?;
        if fd < 0 {
            bail!("{} holds a negative descriptor: {}", CHANNEL_FD_ENV, fd);
        }
        // The parent guarantees this fd is an inherited stream socket.
        let stream = unsafe { UnixStream::from_raw_fd(fd) };
        Ok(WorkerLink {
            stream,
            child_pid: None,
        })
    }

    /// Split this link into channel endpoints.
    pub fn endpoints(&self, config: &CanvasConfig) -> Result<(ChannelSender, ChannelReceiver)> {
        let stream = self
            .stream
            .try_clone()
            .context("Failed to clone worker channel stream")?;
        endpoints(stream, config)
    }

    /// PID of the worker process, on the parent side.
    pub fn child_pid(&self) -> Option<Pid> {
        self.child_pid
    }

    /// Close both directions, unblocking any listener on either side.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        let pid = match self.child_pid {
            Some(p) => p,
            // Worker side, or a link that never owned the child.
            None => return,
        };

        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                log::debug!("WorkerLink drop: worker {} still alive, sending SIGTERM", pid);
                if let Err(e) = kill(pid, Some(Signal::SIGTERM)) {
                    log::warn!("WorkerLink drop: failed to signal worker {}: {}", pid, e);
                }
            }
            Ok(status) => {
                log::debug!("WorkerLink drop: worker {} already exited: {:?}", pid, status);
            }
            Err(nix::Error::ECHILD) | Err(nix::Error::ESRCH) => {
                log::debug!("WorkerLink drop: worker {} already reaped", pid);
            }
            Err(e) => {
                log::warn!("WorkerLink drop: waitpid on worker {} failed: {}", pid, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CanvasMessage;

    #[test]
    fn pair_carries_messages_both_ways() {
        let config = CanvasConfig::default();
        let ((tx_a, mut rx_a), (tx_b, mut rx_b)) = pair(&config).unwrap();

        tx_a.send(&CanvasMessage::Dpi { value: 96.0 }).unwrap();
        assert_eq!(
            rx_b.recv().unwrap(),
            Some(CanvasMessage::Dpi { value: 96.0 })
        );

        tx_b.send(&CanvasMessage::MouseMove { x: 1.0, y: 2.0 })
            .unwrap();
        assert_eq!(
            rx_a.recv().unwrap(),
            Some(CanvasMessage::MouseMove { x: 1.0, y: 2.0 })
        );
    }

    #[test]
    fn shutdown_handle_unblocks_receiver_as_clean_close() {
        let config = CanvasConfig::default();
        let ((_tx_a, mut rx_a), (tx_b, _rx_b)) = pair(&config).unwrap();
        let handle = rx_a.take_shutdown_handle().unwrap();

        let reader = std::thread::spawn(move || rx_a.recv());
        std::thread::sleep(std::time::Duration::from_millis(20));
        handle.shutdown();

        let received = reader.join().unwrap().unwrap();
        assert_eq!(received, None);
        drop(tx_b);
    }

    #[test]
    fn dropping_sender_side_closes_channel() {
        let config = CanvasConfig::default();
        let ((tx_a, rx_a), (tx_b, mut rx_b)) = pair(&config).unwrap();

        tx_a.send(&CanvasMessage::Dpi { value: 120.0 }).unwrap();
        // Both halves of endpoint A must drop for B to see EOF.
        drop(tx_a);
        drop(rx_a);

        assert_eq!(
            rx_b.recv().unwrap(),
            Some(CanvasMessage::Dpi { value: 120.0 })
        );
        assert_eq!(rx_b.recv().unwrap(), None);
        drop(tx_b);
    }
}
