//! Recognizer warm-up.
//!
//! The first `process_iter` of a cold recognizer can be much slower than the
//! following ones. Running one second of real speech through a throw-away
//! instance at startup keeps that cost away from the first client.

use crate::audio::decoder::pcm_to_float;
use crate::transcription::engine::RecognizerHandle;
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// Read up to one second of mono audio from a WAV file.
///
/// Multi-channel files are averaged down to mono. The file's sample rate must
/// match `sample_rate`; nothing is resampled.
pub fn load_warmup_samples(path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
    let file = File::open(path).with_context(|| format!("cannot open warm-up file {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let (header, data) = wav::read(&mut reader)
        .with_context(|| format!("cannot read WAV data from {}", path.display()))?;

    if header.sampling_rate != sample_rate {
        return Err(anyhow!(
            "warm-up file is {} Hz, recognizer expects {} Hz",
            header.sampling_rate,
            sample_rate
        ));
    }

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Sixteen(samples) => samples.into_iter().map(pcm_to_float).collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::Empty => return Err(anyhow!("warm-up file contains no audio")),
    };

    let channels = usize::from(header.channel_count.max(1));
    let mono = interleaved
        .chunks(channels)
        .take(sample_rate as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(mono)
}

/// Push `samples` through a fresh recognizer and discard the output.
pub fn warm_up(recognizer: &RecognizerHandle, samples: &[f32]) -> Duration {
    let started = Instant::now();

    let mut instance = recognizer.create();
    instance.init();
    instance.insert_audio_chunk(samples);
    instance.process_iter();
    instance.finish();

    let elapsed = started.elapsed();
    info!(
        backend = recognizer.name(),
        samples = samples.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Recognizer warmed up"
    );
    elapsed
}
