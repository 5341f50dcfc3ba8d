// tests/traffic_shaping.rs

//! Outbound traffic shaping on the local surface, observed from the raw
//! peer endpoint: resize debouncing and pointer-move rate limiting.

use cytocanvas::channel::{self, ChannelReceiver};
use cytocanvas::config::CanvasConfig;
use cytocanvas::local::host::WindowHost;
use cytocanvas::local::LocalSurface;
use cytocanvas::protocol::CanvasMessage;
use std::thread;
use std::time::{Duration, Instant};
use test_log::test;

struct QuietHost;

impl WindowHost for QuietHost {
    fn request_repaint(&self) {}
}

/// Drain the peer endpoint until the local surface closes the channel,
/// timestamping each message on arrival.
fn collect(mut rx: ChannelReceiver) -> thread::JoinHandle<Vec<(Instant, CanvasMessage)>> {
    thread::spawn(move || {
        let mut seen = Vec::new();
        while let Ok(Some(msg)) = rx.recv() {
            seen.push((Instant::now(), msg));
        }
        seen
    })
}

fn resizes(seen: &[(Instant, CanvasMessage)]) -> Vec<(f64, f64)> {
    seen.iter()
        .filter_map(|(_, msg)| match msg {
            CanvasMessage::Resize {
                width_in,
                height_in,
            } => Some((*width_in, *height_in)),
            _ => None,
        })
        .collect()
}

fn moves(seen: &[(Instant, CanvasMessage)]) -> Vec<(f64, f64)> {
    seen.iter()
        .filter_map(|(_, msg)| match msg {
            CanvasMessage::MouseMove { x, y } => Some((*x, *y)),
            _ => None,
        })
        .collect()
}

#[test]
fn resize_burst_collapses_to_one_message() {
    let config = CanvasConfig::default();
    let ((local_tx, local_rx), (_peer_tx, peer_rx)) = channel::pair(&config).unwrap();
    let surface =
        LocalSurface::spawn(Box::new(QuietHost), local_tx, local_rx, 100.0, &config).unwrap();
    let collector = collect(peer_rx);

    // Five resize events inside 50 ms, ending at 800x600 px = 8x6 inches.
    for (width_px, height_px) in [(500.0, 400.0), (620.0, 430.0), (700.0, 500.0), (760.0, 580.0), (800.0, 600.0)]
    {
        surface.resized(width_px, height_px);
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(250));

    drop(surface);
    let seen = collector.join().unwrap();
    assert_eq!(resizes(&seen), vec![(8.0, 6.0)]);
}

#[test]
fn separated_resize_bursts_produce_two_messages() {
    let config = CanvasConfig::default();
    let ((local_tx, local_rx), (_peer_tx, peer_rx)) = channel::pair(&config).unwrap();
    let surface =
        LocalSurface::spawn(Box::new(QuietHost), local_tx, local_rx, 100.0, &config).unwrap();
    let collector = collect(peer_rx);

    surface.resized(350.0, 250.0);
    surface.resized(400.0, 300.0);
    thread::sleep(Duration::from_millis(350));
    surface.resized(750.0, 550.0);
    surface.resized(800.0, 600.0);
    thread::sleep(Duration::from_millis(350));

    drop(surface);
    let seen = collector.join().unwrap();
    assert_eq!(resizes(&seen), vec![(4.0, 3.0), (8.0, 6.0)]);
}

#[test]
fn move_flood_is_rate_limited_and_latest_wins() {
    let config = CanvasConfig::default();
    let ((local_tx, local_rx), (_peer_tx, peer_rx)) = channel::pair(&config).unwrap();
    let surface =
        LocalSurface::spawn(Box::new(QuietHost), local_tx, local_rx, 100.0, &config).unwrap();
    let collector = collect(peer_rx);

    // Flood moves far faster than the 100 ms send interval for ~1 second.
    let flood = Instant::now();
    let mut last_x = 0.0;
    for i in 0..500 {
        last_x = f64::from(i);
        surface.pointer_moved(last_x, 0.0);
        thread::sleep(Duration::from_millis(2));
    }
    let flood_span = flood.elapsed();
    // Let the final pending value flush.
    thread::sleep(Duration::from_millis(300));

    drop(surface);
    let seen = collector.join().unwrap();
    let flood_moves = moves(&seen);

    // Rate limit: at most one message per interval over the flood, plus the
    // trailing flush.
    let budget = flood_span.as_millis() as usize / 100 + 2;
    assert!(
        flood_moves.len() <= budget,
        "{} moves for a {:?} flood (budget {})",
        flood_moves.len(),
        flood_span,
        budget
    );
    assert!(flood_moves.len() >= 2, "rate limiter sent almost nothing");

    // Latest wins, never stale-then-fresh: coordinates strictly increase
    // and the final message carries the final position.
    for pair in flood_moves.windows(2) {
        assert!(pair[1].0 > pair[0].0, "stale move after fresh: {:?}", pair);
    }
    assert_eq!(flood_moves.last().unwrap().0, last_x);
}

#[test]
fn debounced_resize_and_move_both_arrive() {
    let config = CanvasConfig {
        resize_debounce_ms: 30,
        ..CanvasConfig::default()
    };
    let ((local_tx, local_rx), (_peer_tx, peer_rx)) = channel::pair(&config).unwrap();
    let surface =
        LocalSurface::spawn(Box::new(QuietHost), local_tx, local_rx, 100.0, &config).unwrap();
    let collector = collect(peer_rx);

    surface.resized(800.0, 600.0);
    thread::sleep(Duration::from_millis(100));
    surface.pointer_moved(42.0, 10.0);
    thread::sleep(Duration::from_millis(250));

    drop(surface);
    let seen = collector.join().unwrap();
    assert_eq!(resizes(&seen), vec![(8.0, 6.0)]);
    // The flipped Y uses the settled 600 px height.
    assert_eq!(moves(&seen), vec![(42.0, 590.0)]);
}
