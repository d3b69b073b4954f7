//! Audio preprocessing shared by training and inference.
//!
//! Every clip goes through the same chain: decode, down-mix to mono, resample to [TARGET_SAMPLE_RATE],
//! peak-normalise, and finally pad or cut to a [WaveformSample] of exactly [WINDOW_SIZE] samples.

use std::fmt::{Debug, Formatter};
use std::path::Path;
use error_set::error_set;
use rand::Rng;
use wavers::Wav;

/// Sample rate the backbone was pre-trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;
/// One second of audio at [TARGET_SAMPLE_RATE].
pub const WINDOW_SIZE: usize = 16_000;
/// Peak amplitude below which a clip is considered silence.
pub const SILENCE_THRESHOLD: f32 = 1e-6;

error_set! {
    AudioError = {
        #[display("Audio contained no samples")]
        Empty,
        #[display("Audio contains a non-finite sample at index {index}")]
        NonFinite {
            index: usize
        },
        #[display("Audio is too quiet to analyse, peak amplitude was {peak}")]
        TooQuiet {
            peak: f32
        },
        #[display("Could not resample audio from {from} Hz: {message}")]
        Resample {
            from: u32,
            message: String,
        },
        #[display("Could not decode audio: {0}")]
        Wav(wavers::WaversError),
    };
}

/// Which part of a long signal ends up in the [WaveformSample].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// The first [WINDOW_SIZE] samples, used for inference.
    Leading,
    /// A uniformly random contiguous window, used as augmentation during training.
    Random,
}

/// Decoded audio, samples are interleaved if there is more than one channel.
#[derive(Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub n_channels: u16,
    pub sample_rate: u32,
}

impl Debug for AudioClip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("n_channels", &self.n_channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish_non_exhaustive()
    }
}

impl AudioClip {
    pub fn new(wav: &mut Wav<f32>) -> Result<Self, AudioError> {
        let clip = Self {
            samples: wav.read()?.as_ref().to_vec(),
            n_channels: wav.n_channels(),
            sample_rate: wav.sample_rate() as u32,
        };

        if clip.samples.is_empty() || clip.n_channels == 0 {
            return Err(AudioError::Empty);
        }

        Ok(clip)
    }

    /// Decode the given `.wav` file.
    pub fn from_wav_file(path: impl AsRef<Path>) -> Result<Self, AudioError> {
        let mut wav: Wav<f32> = Wav::from_path(path)?;
        Self::new(&mut wav)
    }

    pub fn write_to_wav_file(&self, destination: &Path) -> Result<(), AudioError> {
        Ok(wavers::write(destination, &self.samples, self.sample_rate as i32, self.n_channels)?)
    }

    /// Amount of samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.n_channels.max(1) as usize
    }

    /// Down-mix to a single channel and resample to [TARGET_SAMPLE_RATE].
    pub fn into_mono_16k(self) -> Result<Vec<f32>, AudioError> {
        let mono = convert_any_to_mono(&self.samples, self.n_channels as usize);

        if self.sample_rate == TARGET_SAMPLE_RATE {
            Ok(mono)
        } else {
            audio_resample(&mono, self.sample_rate, TARGET_SAMPLE_RATE)
        }
    }
}

/// Exactly [WINDOW_SIZE] mono samples at [TARGET_SAMPLE_RATE].
#[derive(Clone, PartialEq)]
pub struct WaveformSample {
    samples: Vec<f32>,
    /// Amount of leading samples which came from the source signal, the rest is zero padding.
    signal_len: usize,
}

impl Debug for WaveformSample {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformSample")
            .field("signal_len", &self.signal_len)
            .finish_non_exhaustive()
    }
}

impl WaveformSample {
    /// Keep the first [WINDOW_SIZE] samples of `signal`, zero-padding at the end if it is shorter.
    pub fn leading(signal: &[f32]) -> Self {
        Self::from_window(signal, 0)
    }

    /// Pick a random contiguous window out of `signal`, zero-padding at the end if it is shorter.
    pub fn random_window(signal: &[f32], rng: &mut impl Rng) -> Self {
        let start = if signal.len() > WINDOW_SIZE {
            rng.random_range(0..=signal.len() - WINDOW_SIZE)
        } else {
            0
        };

        Self::from_window(signal, start)
    }

    pub fn fit(signal: &[f32], mode: WindowMode) -> Self {
        match mode {
            WindowMode::Leading => Self::leading(signal),
            WindowMode::Random => Self::random_window(signal, &mut rand::rng()),
        }
    }

    fn from_window(signal: &[f32], start: usize) -> Self {
        let end = signal.len().min(start + WINDOW_SIZE);
        let mut samples = signal[start..end].to_vec();
        let signal_len = samples.len();
        samples.resize(WINDOW_SIZE, 0.0);

        Self { samples, signal_len }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn signal_len(&self) -> usize {
        self.signal_len
    }
}

/// Scale `samples` so that the loudest sample has an absolute amplitude of `1.0`.
///
/// Fails without touching `samples` if any sample is NaN or infinite, or if the peak is below [SILENCE_THRESHOLD].
pub fn normalize_peak(samples: &mut [f32]) -> Result<(), AudioError> {
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(AudioError::NonFinite { index });
    }

    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));

    if !(peak >= SILENCE_THRESHOLD) {
        return Err(AudioError::TooQuiet { peak });
    }

    samples.iter_mut().for_each(|s| *s /= peak);

    Ok(())
}

/// Run the full preprocessing chain on a decoded clip.
pub fn preprocess(clip: AudioClip, mode: WindowMode) -> Result<WaveformSample, AudioError> {
    let mut signal = clip.into_mono_16k()?;
    normalize_peak(&mut signal)?;

    Ok(WaveformSample::fit(&signal, mode))
}

/// Convert the given, potentially multi-channel, audio into a mono-channel sequence.
pub fn convert_any_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|x| x.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Resample mono audio.
pub fn audio_resample(data: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    use samplerate::{convert, ConverterType};
    convert(from_rate, to_rate, 1, ConverterType::SincBestQuality, data).map_err(|e| AudioError::Resample {
        from: from_rate,
        message: format!("{e:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i % 100) as f32 / 100.0 + 0.01).collect()
    }

    #[test]
    fn short_signal_is_zero_padded() {
        let signal = ramp(10_000);
        let sample = WaveformSample::leading(&signal);

        assert_eq!(sample.samples().len(), WINDOW_SIZE);
        assert_eq!(sample.signal_len(), 10_000);
        assert_eq!(&sample.samples()[..10_000], &signal[..]);
        assert!(sample.samples()[10_000..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn exact_window_is_untouched() {
        let signal = ramp(WINDOW_SIZE);
        let sample = WaveformSample::leading(&signal);

        assert_eq!(sample.samples(), &signal[..]);
        assert_eq!(sample.signal_len(), WINDOW_SIZE);
    }

    #[test]
    fn long_signal_keeps_leading_window() {
        let signal = ramp(40_000);
        let sample = WaveformSample::leading(&signal);

        assert_eq!(sample.samples(), &signal[..WINDOW_SIZE]);
    }

    #[test]
    fn random_window_is_contiguous_subsequence() {
        let signal: Vec<f32> = (0..50_000).map(|i| i as f32).collect();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let sample = WaveformSample::random_window(&signal, &mut rng);
            let out = sample.samples();
            assert_eq!(out.len(), WINDOW_SIZE);

            let start = out[0] as usize;
            assert!(start + WINDOW_SIZE <= signal.len());
            assert_eq!(out, &signal[start..start + WINDOW_SIZE]);
        }
    }

    #[test]
    fn silence_is_rejected_before_normalising() {
        let mut silent = vec![0.0f32; 1000];
        assert!(matches!(normalize_peak(&mut silent), Err(AudioError::TooQuiet { .. })));

        let mut near_silent = vec![1e-8f32; 1000];
        assert!(matches!(normalize_peak(&mut near_silent), Err(AudioError::TooQuiet { .. })));
        assert!(near_silent.iter().all(|s| *s == 1e-8));
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        let mut with_nan = vec![0.5, f32::NAN, 0.2];
        assert!(matches!(normalize_peak(&mut with_nan), Err(AudioError::NonFinite { index: 1 })));
        assert_eq!(with_nan[0], 0.5);

        let mut with_inf = vec![0.1, 0.2, f32::NEG_INFINITY];
        assert!(matches!(normalize_peak(&mut with_inf), Err(AudioError::NonFinite { index: 2 })));
    }

    #[test]
    fn normalises_to_unit_peak() {
        let mut samples = vec![0.1, -0.25, 0.2];
        normalize_peak(&mut samples).unwrap();

        assert_eq!(samples, vec![0.4, -1.0, 0.8]);
    }

    #[test]
    fn stereo_is_averaged() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];

        assert_eq!(convert_any_to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn preprocesses_half_second_8khz_clip() {
        let frames = 4_000;
        let samples = (0..frames)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 8_000.0).sin() * 0.3)
            .collect();
        let clip = AudioClip {
            samples,
            n_channels: 1,
            sample_rate: 8_000,
        };

        let sample = preprocess(clip, WindowMode::Leading).unwrap();

        assert_eq!(sample.samples().len(), WINDOW_SIZE);
        assert!(sample.signal_len().abs_diff(8_000) <= 16, "got {}", sample.signal_len());
        assert!(sample.samples()[sample.signal_len()..].iter().all(|s| *s == 0.0));
        let peak = sample.samples().iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wav_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let clip = AudioClip {
            samples: vec![0.5, -0.5, 0.25, -0.25],
            n_channels: 2,
            sample_rate: 16_000,
        };
        clip.write_to_wav_file(&path).unwrap();

        let decoded = AudioClip::from_wav_file(&path).unwrap();

        assert_eq!(decoded.n_channels, 2);
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.frames(), 2);
    }
}
