use error_set::error_set;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

error_set! {
    LabelError = {
        #[display("Could not access the label file: {0}")]
        Io(std::io::Error),
        #[display("Label file is malformed: {0}")]
        Json(serde_json::Error),
    };
}

/// Emotion codes used by the CREMA-D annotations, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EmotionCode {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
}

impl EmotionCode {
    pub const ALL: [EmotionCode; 6] = [
        EmotionCode::Angry,
        EmotionCode::Disgust,
        EmotionCode::Fear,
        EmotionCode::Happy,
        EmotionCode::Neutral,
        EmotionCode::Sad,
    ];

    /// The single-letter column name in the vote table.
    pub fn code(self) -> &'static str {
        match self {
            EmotionCode::Angry => "A",
            EmotionCode::Disgust => "D",
            EmotionCode::Fear => "F",
            EmotionCode::Happy => "H",
            EmotionCode::Neutral => "N",
            EmotionCode::Sad => "S",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EmotionCode::Angry => "angry",
            EmotionCode::Disgust => "disgust",
            EmotionCode::Fear => "fear",
            EmotionCode::Happy => "happy",
            EmotionCode::Neutral => "neutral",
            EmotionCode::Sad => "sad",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Resolve per-code vote counts (indexed like [EmotionCode::ALL]) to the code with the most votes.
    ///
    /// Ties go to the first code in [EmotionCode::ALL] order.
    pub fn resolve_majority(votes: [u32; 6]) -> EmotionCode {
        let mut best = 0;
        for (i, &count) in votes.iter().enumerate().skip(1) {
            if count > votes[best] {
                best = i;
            }
        }

        Self::ALL[best]
    }
}

/// The ordered set of labels a model was trained on.
///
/// A label's position in this set is the class index of the model output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    /// Create the canonical (sorted, distinct) label set from the resolved labels of a dataset.
    pub fn from_resolved<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        let labels: BTreeSet<String> = labels.into_iter().map(Into::into).collect();

        Self {
            labels: labels.into_iter().collect(),
        }
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LabelError> {
        let file = std::fs::File::create(path)?;
        Ok(serde_json::to_writer_pretty(file, self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(a: u32, d: u32, f: u32, h: u32, n: u32, s: u32) -> [u32; 6] {
        [a, d, f, h, n, s]
    }

    #[test]
    fn majority_vote_picks_most_voted() {
        assert_eq!(EmotionCode::resolve_majority(votes(2, 0, 0, 5, 1, 0)).label(), "happy");
        assert_eq!(EmotionCode::resolve_majority(votes(0, 0, 0, 0, 0, 4)).label(), "sad");
    }

    #[test]
    fn majority_vote_tie_goes_to_first_code() {
        assert_eq!(EmotionCode::resolve_majority(votes(3, 0, 0, 3, 0, 0)).label(), "angry");
        assert_eq!(EmotionCode::resolve_majority(votes(0, 0, 2, 0, 2, 2)).label(), "fear");
    }

    #[test]
    fn codes_round_trip() {
        for code in EmotionCode::ALL {
            assert_eq!(EmotionCode::from_code(code.code()), Some(code));
        }
        assert_eq!(EmotionCode::from_code("X"), None);
    }

    #[test]
    fn label_set_is_sorted_and_distinct() {
        let set = LabelSet::from_resolved(["sad", "angry", "happy", "sad", "angry"]);

        assert_eq!(set.as_slice(), ["angry", "happy", "sad"]);
        for (i, label) in set.as_slice().iter().enumerate() {
            assert_eq!(set.index_of(label), Some(i));
            assert_eq!(set.name(i), Some(label.as_str()));
        }
        assert_eq!(set.index_of("neutral"), None);
        assert_eq!(set.name(3), None);
    }

    #[test]
    fn label_set_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        let set = LabelSet::from_resolved(EmotionCode::ALL.map(EmotionCode::label));

        set.save(&path).unwrap();

        assert_eq!(LabelSet::load(&path).unwrap(), set);
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"disgust\""));
    }
}
