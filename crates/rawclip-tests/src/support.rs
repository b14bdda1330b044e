//! Shared helpers for the integration tests.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rawclip_cache::{to_storage_layout, ClipContext, ClipOptions, ProcessingSettings};
use rawclip_media::DebayerAlgorithm;
use tracing_subscriber::EnvFilter;

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Options with identity colour reconstruction, so cached pixels follow
/// directly from the raw samples.
pub fn identity_options(workers: usize) -> ClipOptions {
    ClipOptions {
        workers,
        processing: ProcessingSettings {
            debayer: DebayerAlgorithm::Identity,
            ..Default::default()
        },
        max_wait_ms: 5000,
        ..Default::default()
    }
}

/// Alternating light and dark samples; the levels shift with `frame`.
pub fn checkerboard(width: usize, height: usize, frame: usize) -> Vec<u16> {
    (0..width * height)
        .map(|i| {
            let (row, col) = (i / width, i % width);
            if (row + col) % 2 == 0 {
                (64 + frame * 100) as u16
            } else {
                (1000 - frame * 50) as u16
            }
        })
        .collect()
}

/// Expected cache contents for `raw` under identity reconstruction.
pub fn identity_rgb(raw: &[u16], black: u32, white: u32) -> Vec<u16> {
    let mut rgb: Vec<u16> = raw.iter().flat_map(|&v| [v, v, v]).collect();
    to_storage_layout(&mut rgb, black, white);
    rgb
}

/// Poll until `done` holds, failing the test after ten seconds.
pub fn wait_until(clip: &ClipContext, what: &str, done: impl Fn(&ClipContext) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(clip) {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn wait_cached(clip: &ClipContext, frames: usize) {
    wait_until(clip, "cached frames", |c| c.cache_stats().cached >= frames);
}

pub fn wait_idle(clip: &ClipContext) {
    wait_until(clip, "an idle pool", |c| !c.is_caching());
}
