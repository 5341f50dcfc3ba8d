// src/protocol/wire.rs
//! Length-prefixed binary framing for [`CanvasMessage`].
//!
//! Every frame is:
//! - a 2-byte magic (`b"CY"`) for stream synchronization,
//! - a 1-byte message tag,
//! - a 4-byte little-endian payload length,
//! - the payload: fixed-width little-endian scalars, then any variable tail
//!   (raw pixel bytes for `Draw`/`Blit`, UTF-8 JSON for `Print` args).
//!
//! Readers block until a complete frame is available; a frame is never
//! partially decoded. Pixel bytes are opaque at this layer; their byte order
//! is a contract between the two surfaces (see [`crate::pixels`]).

use crate::pixels;
use crate::protocol::{BlitData, ButtonId, CanvasMessage, FrameData};
use anyhow::{bail, Context, Result};
use std::io::{ErrorKind, Read, Write};

/// Stream-synchronization magic, first two bytes of every frame.
pub const MAGIC: [u8; 2] = *b"CY";

/// Magic + tag + little-endian payload length.
pub const HEADER_LEN: usize = 7;

/// Default cap on a single frame's payload (256 MiB). Bounds the allocation
/// a corrupted length prefix can demand.
pub const DEFAULT_MAX_PAYLOAD: usize = 256 * 1024 * 1024;

const TAG_DRAW: u8 = 1;
const TAG_BLIT: u8 = 2;
const TAG_RESIZE: u8 = 3;
const TAG_MOUSE_PRESS: u8 = 4;
const TAG_MOUSE_MOVE: u8 = 5;
const TAG_MOUSE_RELEASE: u8 = 6;
const TAG_MOUSE_DOUBLE_CLICK: u8 = 7;
const TAG_PRINT: u8 = 8;
const TAG_DPI: u8 = 9;

/// Write one complete frame. The caller is responsible for serializing
/// writers (one frame per lock acquisition) and for flushing.
pub fn write_message<W: Write>(writer: &mut W, msg: &CanvasMessage) -> Result<()> {
    match msg {
        CanvasMessage::Draw(frame) => {
            let mut fields = Vec::with_capacity(8);
            fields.extend_from_slice(&frame.width.to_le_bytes());
            fields.extend_from_slice(&frame.height.to_le_bytes());
            write_frame(writer, TAG_DRAW, &fields, &frame.buffer)
        }
        CanvasMessage::Blit(blit) => {
            let mut fields = Vec::with_capacity(16);
            fields.extend_from_slice(&blit.width.to_le_bytes());
            fields.extend_from_slice(&blit.height.to_le_bytes());
            fields.extend_from_slice(&blit.top.to_le_bytes());
            fields.extend_from_slice(&blit.left.to_le_bytes());
            write_frame(writer, TAG_BLIT, &fields, &blit.buffer)
        }
        CanvasMessage::Resize {
            width_in,
            height_in,
        } => {
            let mut fields = Vec::with_capacity(16);
            fields.extend_from_slice(&width_in.to_le_bytes());
            fields.extend_from_slice(&height_in.to_le_bytes());
            write_frame(writer, TAG_RESIZE, &fields, &[])
        }
        CanvasMessage::MousePress { x, y, button } => {
            write_frame(writer, TAG_MOUSE_PRESS, &pointer_fields(*x, *y, *button), &[])
        }
        CanvasMessage::MouseMove { x, y } => {
            let mut fields = Vec::with_capacity(16);
            fields.extend_from_slice(&x.to_le_bytes());
            fields.extend_from_slice(&y.to_le_bytes());
            write_frame(writer, TAG_MOUSE_MOVE, &fields, &[])
        }
        CanvasMessage::MouseRelease { x, y, button } => write_frame(
            writer,
            TAG_MOUSE_RELEASE,
            &pointer_fields(*x, *y, *button),
            &[],
        ),
        CanvasMessage::MouseDoubleClick { x, y, button } => write_frame(
            writer,
            TAG_MOUSE_DOUBLE_CLICK,
            &pointer_fields(*x, *y, *button),
            &[],
        ),
        CanvasMessage::Print {
            args,
            width_in,
            height_in,
        } => {
            let mut fields = Vec::with_capacity(16);
            fields.extend_from_slice(&width_in.to_le_bytes());
            fields.extend_from_slice(&height_in.to_le_bytes());
            let tail = serde_json::to_vec(args).context("Failed to serialize print args")?;
            write_frame(writer, TAG_PRINT, &fields, &tail)
        }
        CanvasMessage::Dpi { value } => {
            write_frame(writer, TAG_DPI, &value.to_le_bytes(), &[])
        }
    }
}

/// Read one complete frame. Returns `Ok(None)` on clean end-of-stream (the
/// peer closed the channel between frames). EOF inside a frame, a bad magic,
/// an unrecognized tag, or an inconsistent length is an error.
pub fn read_message<R: Read>(reader: &mut R, max_payload: usize) -> Result<Option<CanvasMessage>> {
    let mut header = [0u8; HEADER_LEN];
    if !read_header(reader, &mut header)? {
        return Ok(None);
    }

    if header[..2] != MAGIC {
        bail!(
            "Bad frame magic {:02x}{:02x}, stream is out of sync",
            header[0],
            header[1]
        );
    }
    let tag = header[2];
    let len = u32::from_le_bytes([header[3], header[4], header[5], header[6]]) as usize;
    if len > max_payload {
        bail!("Frame payload of {} bytes exceeds cap of {}", len, max_payload);
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .context("Channel closed mid-frame")?;

    decode_payload(tag, payload)
}

/// Fill the header buffer, distinguishing clean EOF (no bytes at all) from a
/// truncated header. Returns `false` on clean EOF.
fn read_header<R: Read>(reader: &mut R, header: &mut [u8; HEADER_LEN]) -> Result<bool> {
    loop {
        match reader.read(&mut header[..1]) {
            Ok(0) => return Ok(false),
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read frame header"),
        }
    }
    reader
        .read_exact(&mut header[1..])
        .context("Channel closed mid-header")?;
    Ok(true)
}

fn pointer_fields(x: f64, y: f64, button: ButtonId) -> Vec<u8> {
    let mut fields = Vec::with_capacity(17);
    fields.extend_from_slice(&x.to_le_bytes());
    fields.extend_from_slice(&y.to_le_bytes());
    fields.push(button.code());
    fields
}

fn write_frame<W: Write>(writer: &mut W, tag: u8, fields: &[u8], tail: &[u8]) -> Result<()> {
    let payload_len = fields.len() + tail.len();
    let payload_len = u32::try_from(payload_len)
        .map_err(|_| anyhow::anyhow!("Frame payload of {} bytes overflows length prefix", payload_len))?;

    writer.write_all(&MAGIC).context("Failed to write frame magic")?;
    writer.write_all(&[tag]).context("Failed to write frame tag")?;
    writer
        .write_all(&payload_len.to_le_bytes())
        .context("Failed to write frame length")?;
    writer.write_all(fields).context("Failed to write frame fields")?;
    if !tail.is_empty() {
        writer.write_all(tail).context("Failed to write frame tail")?;
    }
    Ok(())
}

fn decode_payload(tag: u8, mut payload: Vec<u8>) -> Result<Option<CanvasMessage>> {
    let msg = match tag {
        TAG_DRAW => {
            let mut fields = FieldReader::new(&payload, 8)?;
            let width = fields.u32();
            let height = fields.u32();
            let buffer = payload.split_off(8);
            check_pixel_len("Draw", &buffer, width, height)?;
            CanvasMessage::Draw(FrameData {
                buffer,
                width,
                height,
            })
        }
        TAG_BLIT => {
            let mut fields = FieldReader::new(&payload, 16)?;
            let width = fields.u32();
            let height = fields.u32();
            let top = fields.i32();
            let left = fields.i32();
            let buffer = payload.split_off(16);
            check_pixel_len("Blit", &buffer, width, height)?;
            CanvasMessage::Blit(BlitData {
                buffer,
                width,
                height,
                top,
                left,
            })
        }
        TAG_RESIZE => {
            let mut fields = FieldReader::new(&payload, 16)?;
            CanvasMessage::Resize {
                width_in: fields.f64(),
                height_in: fields.f64(),
            }
        }
        TAG_MOUSE_PRESS => {
            let (x, y, button) = decode_pointer(&payload)?;
            CanvasMessage::MousePress { x, y, button }
        }
        TAG_MOUSE_MOVE => {
            let mut fields = FieldReader::new(&payload, 16)?;
            CanvasMessage::MouseMove {
                x: fields.f64(),
                y: fields.f64(),
            }
        }
        TAG_MOUSE_RELEASE => {
            let (x, y, button) = decode_pointer(&payload)?;
            CanvasMessage::MouseRelease { x, y, button }
        }
        TAG_MOUSE_DOUBLE_CLICK => {
            let (x, y, button) = decode_pointer(&payload)?;
            CanvasMessage::MouseDoubleClick { x, y, button }
        }
        TAG_PRINT => {
            let mut fields = FieldReader::new(&payload, 16)?;
            let width_in = fields.f64();
            let height_in = fields.f64();
            let args = serde_json::from_slice(&payload[16..])
                .context("Print args are not valid JSON")?;
            CanvasMessage::Print {
                args,
                width_in,
                height_in,
            }
        }
        TAG_DPI => {
            let mut fields = FieldReader::new(&payload, 8)?;
            CanvasMessage::Dpi {
                value: fields.f64(),
            }
        }
        other => bail!("Unrecognized message tag {}", other),
    };
    Ok(Some(msg))
}

fn decode_pointer(payload: &[u8]) -> Result<(f64, f64, ButtonId)> {
    let mut fields = FieldReader::new(payload, 17)?;
    let x = fields.f64();
    let y = fields.f64();
    let button = ButtonId::from_code(fields.u8());
    Ok((x, y, button))
}

fn check_pixel_len(kind: &str, buffer: &[u8], width: u32, height: u32) -> Result<()> {
    let expected = pixels::buffer_len(width, height);
    if buffer.len() != expected {
        bail!(
            "{} payload carries {} pixel bytes but {}x{} needs {}",
            kind,
            buffer.len(),
            width,
            height,
            expected
        );
    }
    Ok(())
}

/// Little-endian scalar reader over a frame's fixed-field prefix.
struct FieldReader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8], min_len: usize) -> Result<Self> {
        if buf.len() < min_len {
            bail!(
                "Frame payload of {} bytes is shorter than the {} required",
                buf.len(),
                min_len
            );
        }
        Ok(Self { buf, off: 0 })
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.off..self.off + N]);
        self.off += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }
}
