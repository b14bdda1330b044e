//! Integration tests for decode failures, reconfiguration and shutdown.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rawclip_cache::{
    CacheEvent, CacheState, ClipContext, ClipOptions, FrameOrigin, PlaybackQuality,
    ProcessingSettings, MAX_DECODE_ATTEMPTS,
};
use rawclip_core::{CfaPattern, RawClipError, RgbFrame};
use rawclip_media::container::VIDEO_CLASS_COMPRESSED;
use rawclip_media::fixture::{ClipBuilder, ClipWriter};
use rawclip_media::{CorrectionSettings, DebayerAlgorithm, DeltaCodec, EntropyCodec};

use crate::support::*;

/// A compressed 4x2 clip whose frame 1 payload is not a valid stream.
fn clip_with_corrupt_frame() -> Vec<u8> {
    let mut w = ClipWriter::new();
    w.file_header(VIDEO_CLASS_COMPRESSED | 0x01, 1, 24, 1, 0);
    w.raw_info(4, 2, 12, 0, 4095, CfaPattern::Rggb);
    for n in 0..3u32 {
        let payload = if n == 1 {
            b"not a delta stream at all".to_vec()
        } else {
            DeltaCodec.encode(&[n as u16 * 10; 8], 4, 2, 12).unwrap()
        };
        w.video_frame(n, 0, &payload);
    }
    w.finish()
}

fn gradient_clip(frames: usize, width: u16, height: u16) -> ClipBuilder {
    let samples = width as usize * height as usize;
    let mut builder = ClipBuilder::new(width, height, 14);
    for n in 0..frames {
        builder = builder.frame((0..samples).map(|i| ((n * 31 + i) % 16000) as u16).collect());
    }
    builder
}

#[test]
fn failed_frame_is_reported_unavailable() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "bad.MLV", &clip_with_corrupt_frame());
    let clip = ClipContext::open(&path, identity_options(1)).unwrap();
    let events = clip.events();

    wait_cached(&clip, 2);
    wait_idle(&clip);
    assert_eq!(clip.frame_state(1), Some(CacheState::NotCached));
    assert_eq!(clip.cache_stats().failed, 1);

    let failures: Vec<_> = events
        .try_iter()
        .filter(|e| matches!(e, CacheEvent::FrameFailed { frame: 1, .. }))
        .collect();
    assert_eq!(failures.len(), MAX_DECODE_ATTEMPTS as usize);

    let mut out = RgbFrame::new(0, 0);
    match clip.get_frame(1, &mut out) {
        Err(RawClipError::FrameUnavailable { frame, reason }) => {
            assert_eq!(frame, 1);
            assert!(reason.contains("corrupt"), "{reason}");
        }
        other => panic!("expected an unavailable frame, got {other:?}"),
    }
    assert_eq!(clip.get_frame(2, &mut out).unwrap(), FrameOrigin::Cache);
    assert!(!clip.is_caching());
}

#[test]
fn reset_gives_failed_frames_another_try() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "bad.MLV", &clip_with_corrupt_frame());
    let clip = ClipContext::open(&path, identity_options(2)).unwrap();
    let events = clip.events();
    wait_cached(&clip, 2);
    wait_idle(&clip);
    let _ = events.try_iter().count();

    clip.reset_cache();
    wait_cached(&clip, 2);
    wait_idle(&clip);
    assert_eq!(clip.cache_stats().failed, 1);
    let retries = events
        .try_iter()
        .filter(|e| matches!(e, CacheEvent::FrameFailed { frame: 1, .. }))
        .count();
    assert_eq!(retries, MAX_DECODE_ATTEMPTS as usize);
}

#[test]
fn resize_waits_for_workers_before_reallocating() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let builder = gradient_clip(48, 64, 32);
    let path = write_file(dir.path(), "big.MLV", &builder.build());
    let options = ClipOptions {
        processing: ProcessingSettings {
            debayer: DebayerAlgorithm::Bilinear,
            ..Default::default()
        },
        ..identity_options(4)
    };
    let clip = ClipContext::open(&path, options).unwrap();
    let frame_bytes = clip.frame_bytes();

    let config = clip.set_cache_frames(16).unwrap();
    assert_eq!(config.frame_limit, 16);
    assert_eq!(config.byte_limit, 16 * frame_bytes);
    wait_cached(&clip, 16);
    wait_idle(&clip);
    assert_eq!(clip.cache_stats().arena_writes, 16);

    // one megabyte holds every frame of this clip
    let config = clip.set_cache_megabytes(1).unwrap();
    assert_eq!(config.frame_limit, 48);
    wait_cached(&clip, 48);
    let stats = clip.cache_stats();
    assert_eq!(stats.arena_bytes, 48 * frame_bytes);
    assert!(stats.arena_bytes <= 1 << 20);
}

#[test]
fn resizes_from_many_threads_leave_a_consistent_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "big.MLV", &gradient_clip(40, 32, 16).build());
    let clip = Arc::new(ClipContext::open(&path, identity_options(4)).unwrap());

    let resizers: Vec<_> = (0..4)
        .map(|t| {
            let clip = Arc::clone(&clip);
            thread::spawn(move || {
                for i in 0..10 {
                    clip.set_cache_frames(5 + (t * 7 + i * 3) % 36).unwrap();
                }
            })
        })
        .collect();
    let reader = {
        let clip = Arc::clone(&clip);
        thread::spawn(move || {
            let mut out = RgbFrame::new(0, 0);
            for n in 0..200 {
                clip.get_frame(n % 40, &mut out).unwrap();
            }
        })
    };
    for r in resizers {
        r.join().unwrap();
    }
    reader.join().unwrap();

    clip.set_cache_frames(40).unwrap();
    wait_cached(&clip, 40);
    let white = (1u32 << 14) - 1;
    let mut out = RgbFrame::new(0, 0);
    for n in [0usize, 17, 39] {
        clip.get_frame(n, &mut out).unwrap();
        let raw: Vec<u16> = (0..32 * 16).map(|i| ((n * 31 + i) % 16000) as u16).collect();
        assert_eq!(out.data, identity_rgb(&raw, 0, white), "frame {n}");
    }
}

#[test]
fn processing_change_invalidates_cache_and_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "clip.MLV", &gradient_clip(4, 8, 4).build());
    let clip = ClipContext::open(&path, identity_options(2)).unwrap();
    wait_cached(&clip, 4);

    let mut identity = RgbFrame::new(0, 0);
    clip.get_frame(1, &mut identity).unwrap();

    clip.set_processing(&ProcessingSettings {
        corrections: CorrectionSettings::default(),
        debayer: DebayerAlgorithm::Nearest,
    });
    wait_cached(&clip, 4);
    let mut nearest = RgbFrame::new(0, 0);
    assert_eq!(clip.get_frame(1, &mut nearest).unwrap(), FrameOrigin::Cache);
    assert_ne!(identity.data, nearest.data);

    clip.disable_caching();
    clip.set_quality(PlaybackQuality::LowLatency);
    clip.set_processing(&ProcessingSettings {
        debayer: DebayerAlgorithm::Identity,
        ..Default::default()
    });
    let mut out = RgbFrame::new(0, 0);
    assert_eq!(clip.get_frame(1, &mut out).unwrap(), FrameOrigin::Decoded);
    assert_eq!(out.data, identity.data);
    assert_eq!(clip.get_frame(1, &mut out).unwrap(), FrameOrigin::Fallback);

    clip.set_processing(&ProcessingSettings {
        debayer: DebayerAlgorithm::Nearest,
        ..Default::default()
    });
    assert_eq!(clip.get_frame(1, &mut out).unwrap(), FrameOrigin::Decoded);
    assert_eq!(out.data, nearest.data);
}

#[test]
fn highest_quality_waits_for_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "clip.MLV", &gradient_clip(24, 32, 16).build());
    let clip = ClipContext::open(&path, identity_options(2)).unwrap();

    let mut out = RgbFrame::new(0, 0);
    let origin = clip.get_frame(23, &mut out).unwrap();
    assert!(matches!(origin, FrameOrigin::Cache | FrameOrigin::Decoded));
    wait_until(&clip, "frame 23", |c| c.frame_state(23) == Some(CacheState::Cached));
    assert_eq!(clip.get_frame(23, &mut out).unwrap(), FrameOrigin::Cache);
}

#[test]
fn close_while_workers_are_busy() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "big.MLV", &gradient_clip(64, 64, 32).build());
    for _ in 0..5 {
        let clip = ClipContext::open(&path, identity_options(4)).unwrap();
        thread::sleep(Duration::from_millis(1));
        clip.close();
    }
}
