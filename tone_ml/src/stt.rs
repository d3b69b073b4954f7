//! Speech-to-text of a whole answer, used alongside the emotion prediction.

use crate::audio::TARGET_SAMPLE_RATE;
use std::path::Path;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

/// Language interview answers are given in.
const ANSWER_LANGUAGE: &str = "en";

pub struct AnswerTranscriber {
    // The state borrows the model's weights, so the context has to outlive it.
    _context: WhisperContext,
    state: WhisperState,
    threads: i32,
}

impl AnswerTranscriber {
    /// Load a `ggml` whisper model, decoding with at most `threads` CPU threads.
    ///
    /// With the `cuda` feature the model is placed on the GPU instead.
    pub fn load(model: impl AsRef<Path>, threads: u16) -> eyre::Result<Self> {
        whisper_rs::install_whisper_tracing_trampoline();
        let model = model.as_ref();
        tracing::debug!(?model, "Loading whisper model");

        let params = WhisperContextParameters {
            use_gpu: cfg!(feature = "cuda"),
            ..Default::default()
        };
        let context = WhisperContext::new_with_params(&model.to_string_lossy(), params)?;
        let state = context.create_state()?;

        Ok(Self {
            _context: context,
            state,
            threads: i32::from(threads),
        })
    }

    /// Text spoken in mono audio sampled at [TARGET_SAMPLE_RATE], segments joined and trimmed.
    #[tracing::instrument(skip_all, fields(seconds = samples.len() as f32 / TARGET_SAMPLE_RATE as f32))]
    pub fn transcribe(&mut self, samples: &[f32]) -> eyre::Result<String> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(ANSWER_LANGUAGE));
        params.set_n_threads(self.threads);
        params.set_no_timestamps(true);
        // Otherwise whisper.cpp writes its progress straight to stdout.
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_special(false);
        params.set_print_timestamps(false);

        self.state.full(params, samples)?;

        let mut text = String::new();
        for segment in 0..self.state.full_n_segments()? {
            text.push_str(&self.state.full_get_segment_text(segment)?);
        }
        tracing::trace!(%text, "Transcribed answer");

        Ok(text.trim().to_string())
    }
}
