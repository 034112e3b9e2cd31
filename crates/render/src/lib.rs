use std::path::Path;

use lavoe_transport::{
    AudioArc, Block, MAX_BPM, MIN_BPM, Timeline, Track, is_valid_bpm, measures_to_seconds,
};

fn seconds_to_frames(seconds: f64, sample_rate: u32) -> usize {
    (seconds * sample_rate as f64).round().max(0.0) as usize
}

struct RenderBlock {
    start_frame: usize,
    end_frame: usize,
    gain: f32,
    audio: AudioArc,
}

/// Prepare one block for mixing. `None` when the block has nothing to render.
///
/// A block sounds its track's audio, the same source live playback binds for
/// the track.
fn prepare_block(
    block: &Block,
    track: &Track,
    bpm: f64,
    sample_rate: u32,
) -> Option<RenderBlock> {
    let bound = track.audio.as_ref()?;

    let audio = if bound.audio.sample_rate() != sample_rate {
        match bound.audio.resample(sample_rate) {
            Ok(audio) => audio,
            Err(err) => {
                tracing::warn!(block = %block.name, %err, "skipping block that failed to resample");
                return None;
            }
        }
    } else {
        bound.audio.clone()
    };

    let start_frame = seconds_to_frames(measures_to_seconds(block.start, bpm), sample_rate);
    let length = seconds_to_frames(measures_to_seconds(block.duration, bpm), sample_rate);

    Some(RenderBlock {
        start_frame,
        end_frame: start_frame + length.min(audio.frames()),
        gain: track.gain(),
        audio,
    })
}

/// Mix every block of every unmuted track into one buffer.
///
/// A block sounds from `start * seconds_per_measure`, the same placement the
/// live driver uses, for at most its own duration. The result is as long as
/// the latest block end.
pub fn render_timeline(
    timeline: &Timeline,
    bpm: f64,
    sample_rate: u32,
    channels: u16,
) -> anyhow::Result<AudioArc> {
    anyhow::ensure!(
        is_valid_bpm(bpm),
        "tempo must be within {MIN_BPM}..={MAX_BPM} bpm, got {bpm}"
    );
    anyhow::ensure!(sample_rate > 0, "sample rate must be positive");
    anyhow::ensure!(channels > 0, "channel count must be positive");

    let total_frames = seconds_to_frames(measures_to_seconds(timeline.end_measure(), bpm), sample_rate);
    let output_channels = channels as usize;

    let mut render_blocks = Vec::new();
    for block in timeline.blocks() {
        let Some(track) = timeline.track(block.track) else {
            tracing::warn!(block = %block.name, track = %block.track, "skipping block on missing track");
            continue;
        };
        if track.muted {
            continue;
        }
        match prepare_block(block, track, bpm, sample_rate) {
            Some(prepared) => render_blocks.push(prepared),
            None => tracing::debug!(block = %block.name, "block has no audio"),
        }
    }

    let mut samples = vec![0.0f32; total_frames * output_channels];

    for block in &render_blocks {
        let end = block.end_frame.min(total_frames);
        for frame_idx in block.start_frame..end {
            let source_frame = frame_idx - block.start_frame;
            for ch in 0..output_channels {
                samples[frame_idx * output_channels + ch] +=
                    block.audio.sample_for_channel(source_frame, ch) * block.gain;
            }
        }
    }

    tracing::info!(
        blocks = render_blocks.len(),
        seconds = total_frames as f64 / sample_rate as f64,
        "rendered timeline"
    );

    Ok(AudioArc::new(samples, sample_rate, channels))
}

/// Encode as 32-bit float WAV.
pub fn write_wav(buffer: &AudioArc, path: &Path) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;

    for &sample in buffer.samples() {
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lavoe_transport::{BoundAudio, NewBlock, TrackId};

    const RATE: u32 = 1000;

    fn constant(value: f32, seconds: f64) -> BoundAudio {
        let frames = seconds_to_frames(seconds, RATE);
        BoundAudio::in_memory(AudioArc::new(vec![value; frames], RATE, 1), "tone")
    }

    fn track_with(timeline: &mut Timeline, value: f32, seconds: f64) -> TrackId {
        let id = timeline.add_audio_track("tone", constant(value, seconds));
        timeline.set_volume(id, 100).unwrap();
        id
    }

    #[test]
    fn test_blocks_placed_on_zero_based_axis() {
        let mut timeline = Timeline::new(64.0);
        let a = track_with(&mut timeline, 1.0, 6.0);
        let b = track_with(&mut timeline, 0.5, 6.0);
        timeline.add_block(NewBlock::new("a", a, 1.0, 4.0)).unwrap();
        timeline.add_block(NewBlock::new("b", b, 5.0, 4.0)).unwrap();

        // 160 bpm: 1.5 s per measure
        let out = render_timeline(&timeline, 160.0, RATE, 1).unwrap();
        let s = out.samples();

        assert_eq!(out.frames(), 13_500);
        assert_eq!(s[1_499], 0.0);
        assert_eq!(s[1_500], 1.0);
        assert_eq!(s[7_499], 1.0);
        // first block ends where the second starts, at 7.5 s
        assert_eq!(s[7_500], 0.5);
        assert_eq!(s[13_499], 0.5);
    }

    #[test]
    fn test_block_audio_truncated_to_duration() {
        let mut timeline = Timeline::new(64.0);
        let a = track_with(&mut timeline, 1.0, 10.0);
        // one measure at 120 bpm is 2 s
        timeline.add_block(NewBlock::new("a", a, 1.0, 1.0)).unwrap();
        timeline.add_block(NewBlock::new("marker", a, 3.0, 0.25)).unwrap();

        let out = render_timeline(&timeline, 120.0, RATE, 1).unwrap();
        let s = out.samples();
        assert_eq!(s[3_999], 1.0);
        assert_eq!(s[4_000], 0.0);
        assert_eq!(s[5_999], 0.0);
        assert_eq!(s[6_000], 1.0);
    }

    #[test]
    fn test_short_audio_leaves_silence() {
        let mut timeline = Timeline::new(64.0);
        let a = track_with(&mut timeline, 1.0, 0.5);
        timeline.add_block(NewBlock::new("a", a, 0.0, 2.0)).unwrap();

        let out = render_timeline(&timeline, 120.0, RATE, 1).unwrap();
        assert_eq!(out.frames(), 4_000);
        assert_eq!(out.samples()[499], 1.0);
        assert_eq!(out.samples()[500], 0.0);
    }

    #[test]
    fn test_track_gain_and_mute() {
        let mut timeline = Timeline::new(64.0);
        let loud = track_with(&mut timeline, 1.0, 2.0);
        let quiet = track_with(&mut timeline, 1.0, 2.0);
        let muted = track_with(&mut timeline, 1.0, 2.0);
        timeline.set_volume(quiet, 25).unwrap();
        timeline.set_muted(muted, true).unwrap();
        for track in [loud, quiet, muted] {
            timeline.add_block(NewBlock::new("x", track, 0.0, 1.0)).unwrap();
        }

        let out = render_timeline(&timeline, 120.0, RATE, 1).unwrap();
        assert!((out.samples()[10] - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_block_plays_its_track_audio() {
        let mut timeline = Timeline::new(64.0);
        let a = track_with(&mut timeline, 1.0, 2.0);
        let bare = timeline.add_track();
        timeline
            .add_block(NewBlock::new("own", a, 0.0, 1.0).with_audio(constant(0.25, 2.0)))
            .unwrap();
        timeline
            .add_block(NewBlock::new("stray", bare, 1.0, 1.0).with_audio(constant(0.25, 2.0)))
            .unwrap();

        let out = render_timeline(&timeline, 120.0, RATE, 1).unwrap();
        assert_eq!(out.samples()[100], 1.0);
        // a track without audio stays silent whatever its blocks carry
        assert_eq!(out.samples()[2_100], 0.0);
    }

    #[test]
    fn test_mono_source_fills_every_output_channel() {
        let mut timeline = Timeline::new(64.0);
        let a = track_with(&mut timeline, 0.5, 2.0);
        timeline.add_block(NewBlock::new("a", a, 0.0, 1.0)).unwrap();

        let out = render_timeline(&timeline, 120.0, RATE, 2).unwrap();
        assert_eq!(out.channels(), 2);
        assert_eq!(&out.samples()[..4], &[0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_blocks_without_audio_render_silence() {
        let mut timeline = Timeline::with_default_tracks(64.0);
        let melody = timeline.tracks()[0].id;
        timeline.add_block(NewBlock::new("empty", melody, 1.0, 2.0)).unwrap();

        let out = render_timeline(&timeline, 120.0, RATE, 1).unwrap();
        assert_eq!(out.frames(), 6_000);
        assert!(out.samples().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_empty_timeline_and_bad_params() {
        let timeline = Timeline::new(64.0);
        assert!(render_timeline(&timeline, 120.0, RATE, 1).unwrap().is_empty());
        assert!(render_timeline(&timeline, 0.0, RATE, 1).is_err());
        assert!(render_timeline(&timeline, 1e-300, RATE, 1).is_err());
        assert!(render_timeline(&timeline, 1e12, RATE, 1).is_err());
        assert!(render_timeline(&timeline, f64::NAN, RATE, 1).is_err());
        assert!(render_timeline(&timeline, 120.0, RATE, 0).is_err());
    }

    #[test]
    fn test_write_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        let buffer = AudioArc::new(vec![0.0, 0.25, -0.5, 1.0], 22050, 2);

        write_wav(&buffer, &path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.0, 0.25, -0.5, 1.0]);
    }
}
