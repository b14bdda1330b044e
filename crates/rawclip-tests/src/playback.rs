//! Integration tests for cached playback.

use std::time::Duration;

use rawclip_cache::{
    CacheEvent, CacheState, ClipContext, ClipOptions, FileAccess, FrameOrigin, PlaybackQuality,
};
use rawclip_core::RgbFrame;
use rawclip_media::fixture::{ClipBuilder, ClipWriter};

use crate::support::*;

const WIDTH: usize = 8;
const HEIGHT: usize = 4;
const BLACK: u32 = 64;
const WHITE: u32 = 1023;

fn checkerboard_clip(frames: usize) -> ClipBuilder {
    let mut builder = ClipBuilder::new(WIDTH as u16, HEIGHT as u16, 10).levels(BLACK, WHITE);
    for n in 0..frames {
        builder = builder.frame(checkerboard(WIDTH, HEIGHT, n));
    }
    builder
}

fn expected(frame: usize) -> Vec<u16> {
    identity_rgb(&checkerboard(WIDTH, HEIGHT, frame), BLACK, WHITE)
}

fn read_all(clip: &ClipContext, frames: usize) -> Vec<Vec<u16>> {
    let mut out = RgbFrame::new(0, 0);
    (0..frames)
        .map(|n| {
            assert_eq!(clip.get_frame(n, &mut out).unwrap(), FrameOrigin::Cache);
            out.data.clone()
        })
        .collect()
}

#[test]
fn checkerboard_clip_plays_back_exactly() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "A001.MLV", &checkerboard_clip(4).build());

    let options = ClipOptions {
        caching_enabled: false,
        ..identity_options(2)
    };
    let clip = ClipContext::open(&path, options).unwrap();
    assert_eq!(clip.config().frame_limit, 4);

    clip.enable_caching();
    wait_until(&clip, "all four frames", |c| {
        (0..4).all(|n| c.frame_state(n) == Some(CacheState::Cached))
    });

    let first = read_all(&clip, 4);
    for (n, frame) in first.iter().enumerate() {
        assert_eq!(frame, &expected(n), "frame {n}");
    }

    clip.disable_caching();
    clip.enable_caching();
    clip.reset_cache();
    wait_cached(&clip, 4);
    assert_eq!(read_all(&clip, 4), first);
}

#[test]
fn compressed_clip_matches_uncompressed() {
    let dir = tempfile::tempdir().unwrap();
    let plain = write_file(dir.path(), "plain.MLV", &checkerboard_clip(3).build());
    let packed = write_file(
        dir.path(),
        "packed.MLV",
        &checkerboard_clip(3).compressed(true).frame_space(12).build(),
    );

    let plain = ClipContext::open(&plain, identity_options(2)).unwrap();
    let packed = ClipContext::open(&packed, identity_options(2)).unwrap();
    assert!(packed.metadata().compressed);

    let mut a = RgbFrame::new(0, 0);
    let mut b = RgbFrame::new(0, 0);
    for n in 0..3 {
        plain.get_frame(n, &mut a).unwrap();
        packed.get_frame(n, &mut b).unwrap();
        assert_eq!(a, b, "frame {n}");
    }
}

#[test]
fn requested_frame_is_decoded_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "clip.MLV", &checkerboard_clip(8).build());
    let options = ClipOptions {
        caching_enabled: false,
        quality: PlaybackQuality::LowLatency,
        ..identity_options(1)
    };
    let clip = ClipContext::open(&path, options).unwrap();
    let events = clip.events();

    let mut out = RgbFrame::new(0, 0);
    assert_eq!(clip.get_frame(5, &mut out).unwrap(), FrameOrigin::Decoded);

    clip.enable_caching();
    let first = events.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(first, CacheEvent::FrameCached(5));

    let rest: Vec<_> = (0..7)
        .map(|_| events.recv_timeout(Duration::from_secs(10)).unwrap())
        .collect();
    assert_eq!(
        rest,
        [0, 1, 2, 3, 4, 6, 7].map(CacheEvent::FrameCached).to_vec()
    );
}

#[test]
fn low_latency_serves_fallback_without_touching_arena() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "clip.MLV", &checkerboard_clip(4).build());
    let options = ClipOptions {
        caching_enabled: false,
        quality: PlaybackQuality::LowLatency,
        ..identity_options(2)
    };
    let clip = ClipContext::open(&path, options).unwrap();

    let mut out = RgbFrame::new(0, 0);
    assert_eq!(clip.get_frame(2, &mut out).unwrap(), FrameOrigin::Decoded);
    assert_eq!(out.data, expected(2));
    assert_eq!(clip.get_frame(2, &mut out).unwrap(), FrameOrigin::Fallback);
    assert_eq!(out.data, expected(2));

    assert_eq!(clip.get_frame(3, &mut out).unwrap(), FrameOrigin::Decoded);
    assert_eq!(out.data, expected(3));
    assert_eq!(clip.get_frame(2, &mut out).unwrap(), FrameOrigin::Decoded);

    assert_eq!(clip.cache_stats().arena_writes, 0);
    assert_eq!(clip.frame_state(2), Some(CacheState::NotCached));
}

#[test]
fn frames_outside_the_window_decode_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "clip.MLV", &checkerboard_clip(6).build());
    let options = ClipOptions {
        cache_frames: Some(2),
        ..identity_options(2)
    };
    let clip = ClipContext::open(&path, options).unwrap();
    assert_eq!(clip.config().frame_limit, 2);
    wait_cached(&clip, 2);
    wait_idle(&clip);

    let mut out = RgbFrame::new(0, 0);
    assert_eq!(clip.get_frame(4, &mut out).unwrap(), FrameOrigin::Decoded);
    assert_eq!(out.data, expected(4));
    assert_eq!(clip.frame_state(4), None);
    assert_eq!(clip.get_frame(1, &mut out).unwrap(), FrameOrigin::Cache);
}

#[test]
fn continuation_chunks_read_alike_with_both_file_modes() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = ClipWriter::new();
    first.file_header(0x01, 2, 25, 1, 0);
    first.raw_info(
        WIDTH as u16,
        HEIGHT as u16,
        10,
        BLACK,
        WHITE,
        rawclip_core::CfaPattern::Rggb,
    );
    let builder = checkerboard_clip(4);
    first.video_frame(1, 0, &builder.payload(1));
    first.video_frame(0, 0, &builder.payload(0));
    let mut second = ClipWriter::new();
    second.file_header(0x01, 2, 25, 1, 1);
    second.video_frame(3, 8, &builder.payload(3));
    second.video_frame(2, 0, &builder.payload(2));

    let path = write_file(dir.path(), "M12-0001.MLV", &first.finish());
    write_file(dir.path(), "M12-0001.M00", &second.finish());

    for file_access in [FileAccess::Shared, FileAccess::PerWorker] {
        let options = ClipOptions {
            file_access,
            ..identity_options(3)
        };
        let clip = ClipContext::open(&path, options).unwrap();
        assert_eq!(clip.frame_count(), 4);
        assert_eq!(clip.index().get(3).unwrap().chunk, 1);

        wait_cached(&clip, 4);
        for (n, frame) in read_all(&clip, 4).iter().enumerate() {
            assert_eq!(frame, &expected(n), "{file_access:?} frame {n}");
        }
        clip.close();
    }
}
