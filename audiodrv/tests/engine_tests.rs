use audiodrv::engine::{CaptureCursor, Captured, PlaybackCursor, Primed, Resampler};
use audiodrv::Samples;

fn ramp(n: usize) -> Samples {
    Samples::Float((0..n).map(|i| i as f64 / n as f64).collect())
}

#[test]
fn test_prime_advances_until_finished() {
    let source = ramp(10);
    let cursor = PlaybackCursor::new(10, 1, false);
    let mut out = [0i16; 4];

    assert_eq!(cursor.prime(&source, &mut out), Primed::Frames(4));
    assert_eq!(cursor.position(), 4);
    assert_eq!(cursor.prime(&source, &mut out), Primed::Frames(4));
    assert_eq!(cursor.position(), 8);
    assert_eq!(cursor.prime(&source, &mut out), Primed::Frames(2));
    assert_eq!(cursor.position(), 10);
    assert!(!cursor.is_done());

    assert_eq!(cursor.prime(&source, &mut out), Primed::Finished);
    assert!(cursor.is_done());
    assert_eq!(cursor.position(), 10);
}

#[test]
fn test_prime_converts_samples() {
    let source = Samples::Float(vec![0.5, -0.5, 1.0]);
    let cursor = PlaybackCursor::new(3, 1, false);
    let mut out = [0i16; 3];
    cursor.prime(&source, &mut out);
    assert_eq!(out, [16383, -16383, 32767]);

    // integer samples are narrowed, not scaled
    let source = Samples::Int(vec![1000, 0x1_0005]);
    let cursor = PlaybackCursor::new(2, 1, false);
    let mut out = [0i16; 2];
    cursor.prime(&source, &mut out);
    assert_eq!(out, [1000, 5]);
}

#[test]
fn test_looping_wraps_to_start() {
    let source = ramp(5);
    let cursor = PlaybackCursor::new(5, 1, true);
    let mut out = [0.0f32; 4];

    assert_eq!(cursor.prime(&source, &mut out), Primed::Frames(4));
    assert_eq!(cursor.prime(&source, &mut out), Primed::Frames(1));
    assert_eq!(cursor.position(), 5);

    assert_eq!(cursor.prime(&source, &mut out), Primed::Frames(4));
    assert_eq!(cursor.position(), 4);
    assert_eq!(out[0], 0.0);
    assert!(!cursor.is_done());
}

#[test]
fn test_empty_source_finishes_immediately() {
    let source = Samples::Float(Vec::new());
    let mut out = [0i16; 8];

    let cursor = PlaybackCursor::new(0, 1, false);
    assert_eq!(cursor.prime(&source, &mut out), Primed::Finished);
    assert!(cursor.is_done());

    // looping over nothing must not spin
    let cursor = PlaybackCursor::new(0, 1, true);
    assert_eq!(cursor.prime(&source, &mut out), Primed::Finished);
    assert!(cursor.is_done());
}

#[test]
fn test_zero_capacity_is_not_exhaustion() {
    let source = Samples::Float(vec![0.1, 0.2, 0.3, 0.4]);
    let cursor = PlaybackCursor::new(2, 2, false);
    let mut out = [0i16; 1];

    assert_eq!(cursor.prime(&source, &mut out), Primed::Frames(0));
    assert!(!cursor.is_done());
    assert_eq!(cursor.position(), 0);
}

#[test]
fn test_stereo_prime_counts_frames() {
    let source = Samples::Float(vec![0.5, -0.5, 0.25, -0.25, 0.0, 0.0]);
    let cursor = PlaybackCursor::new(3, 2, false);
    let mut out = [0.0f32; 5];

    // five slots hold two whole stereo frames
    assert_eq!(cursor.prime(&source, &mut out), Primed::Frames(2));
    assert_eq!(&out[..4], &[0.5, -0.5, 0.25, -0.25]);
    assert_eq!(cursor.position(), 2);
}

#[test]
fn test_fill_pads_with_silence() {
    let source = Samples::Float(vec![0.5; 3]);
    let cursor = PlaybackCursor::new(3, 1, false);
    let mut out = [7i16; 8];

    assert_eq!(cursor.fill(&source, &mut out), 3);
    assert_eq!(&out[..3], &[16383; 3]);
    assert_eq!(&out[3..], &[0; 5]);
    assert!(cursor.is_done());
}

#[test]
fn test_rewind_keeps_done_flag() {
    let source = ramp(2);
    let cursor = PlaybackCursor::new(2, 1, false);
    let mut out = [0i16; 4];
    cursor.fill(&source, &mut out);
    assert!(cursor.is_done());

    cursor.rewind();
    assert_eq!(cursor.position(), 0);
    assert!(cursor.is_done());
}

#[test]
fn test_capture_downmixes_to_mono() {
    let cursor = CaptureCursor::new(4, 1);
    let mut resampler = Resampler::new(44100, 44100);
    let mut target = Samples::Float(vec![0.0; 4]);

    let input: [i16; 4] = [16384, 0, -16384, 0];
    assert_eq!(
        cursor.capture(&mut resampler, &input, 2, &mut target),
        Captured::Continue
    );
    assert_eq!(cursor.position(), 2);
    assert_eq!(target, Samples::Float(vec![0.25, -0.25, 0.0, 0.0]));
}

#[test]
fn test_capture_duplicates_mono_input() {
    let cursor = CaptureCursor::new(2, 2);
    let mut resampler = Resampler::new(8000, 8000);
    let mut target = Samples::Float(vec![0.0; 4]);

    let input = [0.5f32, -0.5];
    assert_eq!(
        cursor.capture(&mut resampler, &input, 1, &mut target),
        Captured::Full
    );
    assert_eq!(target, Samples::Float(vec![0.5, 0.5, -0.5, -0.5]));
}

#[test]
fn test_capture_stops_when_full() {
    let cursor = CaptureCursor::new(3, 1);
    let mut resampler = Resampler::new(8000, 8000);
    let mut target = Samples::Float(vec![0.0; 3]);

    let input = [0.25f32; 5];
    assert_eq!(
        cursor.capture(&mut resampler, &input, 1, &mut target),
        Captured::Full
    );
    assert!(cursor.is_done());
    assert_eq!(cursor.position(), 3);

    // further input is ignored
    let more = [1.0f32; 2];
    assert_eq!(
        cursor.capture(&mut resampler, &more, 1, &mut target),
        Captured::Full
    );
    assert_eq!(target, Samples::Float(vec![0.25; 3]));
}

#[test]
fn test_capture_downsamples_and_upsamples() {
    let cursor = CaptureCursor::new(100, 1);
    let mut resampler = Resampler::new(48000, 24000);
    let mut target = Samples::Float(vec![0.0; 100]);
    let input = [0.5f32; 40];
    cursor.capture(&mut resampler, &input, 1, &mut target);
    assert_eq!(cursor.position(), 20);

    let cursor = CaptureCursor::new(100, 1);
    let mut resampler = Resampler::new(8000, 16000);
    let mut target = Samples::Float(vec![0.0; 100]);
    cursor.capture(&mut resampler, &input, 1, &mut target);
    assert_eq!(cursor.position(), 80);
}

#[test]
fn test_capture_into_integer_target() {
    let cursor = CaptureCursor::new(2, 1);
    let mut resampler = Resampler::new(8000, 8000);
    let mut target = Samples::Int(vec![0; 2]);
    cursor.capture(&mut resampler, &[0.5f32, -1.0], 1, &mut target);
    assert_eq!(target, Samples::Int(vec![16383, -32767]));
}

#[test]
fn test_loop_repeats_source_exactly_once_per_pass() {
    let n = 7;
    let source = Samples::Float((0..n).map(|i| i as f64 / 10.0).collect());
    let cursor = PlaybackCursor::new(n, 1, true);

    let mut delivered = Vec::new();
    let mut out = [0.0f32; 3];
    let mut wraps = 0;
    let mut last = 0;
    while delivered.len() < 2 * n {
        match cursor.prime(&source, &mut out) {
            Primed::Frames(k) => delivered.extend_from_slice(&out[..k]),
            Primed::Finished => panic!("looping cursor finished"),
        }
        if cursor.position() < last {
            wraps += 1;
        }
        last = cursor.position();
    }

    assert_eq!(wraps, 1);
    assert_eq!(&delivered[n..2 * n], &delivered[..n]);
}

#[test]
fn test_cursor_is_monotonic() {
    let source = ramp(100);
    for capacity in [1, 3, 16, 64, 200] {
        let cursor = PlaybackCursor::new(100, 1, false);
        let mut out = vec![0i16; capacity];
        let mut last = 0;
        while cursor.prime(&source, &mut out) != Primed::Finished {
            let pos = cursor.position();
            assert!(pos >= last && pos <= 100);
            last = pos;
        }
        assert_eq!(cursor.position(), 100);
    }
}
