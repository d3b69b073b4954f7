//! Index of a CREMA-D style dataset directory.
//!
//! ```text
//! <data_dir>/
//!   processedResults/tabulatedVotes.csv   (or tabulatedVotes.csv in the root)
//!   AudioWAV/<fileName>.wav
//! ```

use crate::emotion_classifier::data::EmotionItem;
use crate::emotion_classifier::labels::{EmotionCode, LabelSet};
use error_set::error_set;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

pub const VOTES_FILE: &str = "tabulatedVotes.csv";
pub const PROCESSED_DIR: &str = "processedResults";
pub const AUDIO_DIR: &str = "AudioWAV";
const ID_COLUMN: &str = "fileName";

error_set! {
    DatasetError = {
        #[display("No tabulatedVotes.csv found in {dir:?}")]
        MissingVotes {
            dir: PathBuf
        },
        #[display("Row for '{file}' has a non-numeric '{code}' vote: '{value}'")]
        InvalidVote {
            file: String,
            code: &'static str,
            value: String,
        },
        #[display("None of the annotated clips in {dir:?} have audio")]
        NoClips {
            dir: PathBuf
        },
        #[display("Could not read the vote table: {0}")]
        Csv(csv::Error),
    };
}

#[derive(Debug, Clone)]
pub struct CremaIndex {
    pub clips: Vec<EmotionItem>,
    pub labels: LabelSet,
    /// Amount of annotated rows without a matching audio file.
    pub skipped: usize,
}

impl CremaIndex {
    #[tracing::instrument(skip_all, fields(dir = ?data_dir.as_ref()))]
    pub fn load(data_dir: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let data_dir = data_dir.as_ref();
        let votes_path = [data_dir.join(PROCESSED_DIR).join(VOTES_FILE), data_dir.join(VOTES_FILE)]
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| DatasetError::MissingVotes {
                dir: data_dir.to_path_buf(),
            })?;

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(&votes_path)?;
        let headers = reader.headers()?.clone();
        // Exported tables sometimes lack the header and carry the identifier as the unnamed index column.
        let id_column = headers.iter().position(|h| h == ID_COLUMN).unwrap_or(0);
        let vote_columns = EmotionCode::ALL.map(|code| headers.iter().position(|h| h == code.code()));

        let mut resolved = Vec::new();
        let mut skipped = 0;

        for record in reader.records() {
            let record = record?;
            let Some(file) = record.get(id_column).map(str::trim) else {
                continue;
            };

            let mut votes = [0u32; 6];
            for (i, column) in vote_columns.iter().enumerate() {
                let cell = column.and_then(|c| record.get(c)).map(str::trim).unwrap_or_default();
                votes[i] = parse_vote(cell).ok_or_else(|| DatasetError::InvalidVote {
                    file: file.to_string(),
                    code: EmotionCode::ALL[i].code(),
                    value: cell.to_string(),
                })?;
            }

            let path = data_dir.join(AUDIO_DIR).join(format!("{file}.wav"));
            if !path.exists() {
                tracing::debug!(?path, "Skipping annotated clip without audio");
                skipped += 1;
                continue;
            }

            resolved.push((path, EmotionCode::resolve_majority(votes).label()));
        }

        if resolved.is_empty() {
            return Err(DatasetError::NoClips {
                dir: data_dir.to_path_buf(),
            });
        }

        let labels = LabelSet::from_resolved(resolved.iter().map(|(_, label)| *label));
        let clips = resolved
            .into_iter()
            .filter_map(|(path, label)| Some(EmotionItem { path, label: labels.index_of(label)? }))
            .collect::<Vec<_>>();

        tracing::info!(clips = clips.len(), skipped, labels = ?labels.as_slice(), "Indexed dataset");

        Ok(Self { clips, labels, skipped })
    }

    /// Deterministically shuffle and split the clips into `(train, validation)`.
    pub fn split(&self, validation_fraction: f64, seed: u64) -> (Vec<EmotionItem>, Vec<EmotionItem>) {
        let mut clips = self.clips.clone();
        clips.shuffle(&mut StdRng::seed_from_u64(seed));

        let n_valid = ((clips.len() as f64 * validation_fraction).round() as usize).min(clips.len());
        let train = clips.split_off(n_valid);

        (train, clips)
    }
}

/// Empty cells count as no votes.
fn parse_vote(cell: &str) -> Option<u32> {
    if cell.is_empty() {
        return Some(0);
    }

    cell.parse::<u32>().ok().or_else(|| {
        let value = cell.parse::<f64>().ok()?;
        (value.is_finite() && value >= 0.0).then_some(value.round() as u32)
    })
}
