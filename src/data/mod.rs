//! # Dialogue data preparation
//!
//! Turns tokenized dialogues (history, user query, system answer) into the integer tensors
//! consumed by the model. Vocabulary construction and corpus loading are left to the caller, which
//! supplies the encoder vocabulary (`word_idx`) and the closed decoder vocabulary.
//!
//! Words absent from the decoder vocabulary are given per-dialogue out-of-vocabulary ids
//! `decoder_vocab_size + k`, numbered in order of first appearance in the history. Answers refer
//! to these ids so that a copied source word can be mapped back to its surface form.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_memn2n::data::{Batch, DataConfig, DialogData, DialogExample};
//! use std::collections::HashMap;
//! use tch::Device;
//!
//! # let word_idx: HashMap<String, i64> = HashMap::new();
//! # let decoder_vocab: HashMap<String, i64> = HashMap::new();
//! let example = DialogExample::new(
//!     vec![vec!["hello", "what", "can", "i", "help", "you", "with", "today"]],
//!     vec!["book", "a", "table", "in", "paris"],
//!     vec!["any", "preference", "on", "a", "type", "of", "cuisine"],
//!     0,
//! );
//! let data = DialogData::new(vec![example], &word_idx, &decoder_vocab, &DataConfig::default())?;
//! let batch = Batch::new(&data, 0, 1, 0, false)?;
//! let tensors = batch.to_tensors(Device::Cpu);
//! # Ok(())
//! # }
//! ```

mod batch;
mod vectorize;

pub use batch::{Batch, BatchTensors};
pub use vectorize::{DialogData, VectorizedDialog};

use serde::{Deserialize, Serialize};

/// Padding
pub const PAD_ID: i64 = 0;
/// Unknown word
pub const UNK_ID: i64 = 1;
/// Start of decoding
pub const GO_ID: i64 = 2;
/// End of sequence
pub const EOS_ID: i64 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
/// # Data preparation configuration
pub struct DataConfig {
    /// Number of words per sentence (history sentences and queries)
    pub sentence_size: usize,
    pub batch_size: usize,
    /// Maximum number of history sentences kept in memory
    pub max_memory_size: usize,
    /// Number of decoder steps per answer, including the end of sequence token
    pub candidate_sentence_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            sentence_size: 20,
            batch_size: 32,
            max_memory_size: 50,
            candidate_sentence_size: 20,
        }
    }
}

#[derive(Debug, Clone)]
/// # Tokenized dialogue turn
pub struct DialogExample {
    /// Dialogue history, one tokenized sentence per turn
    pub story: Vec<Vec<String>>,
    pub query: Vec<String>,
    pub answer: Vec<String>,
    pub dialog_id: i64,
}

impl DialogExample {
    pub fn new<S: AsRef<str>>(
        story: Vec<Vec<S>>,
        query: Vec<S>,
        answer: Vec<S>,
        dialog_id: i64,
    ) -> DialogExample {
        let to_strings =
            |words: Vec<S>| -> Vec<String> { words.iter().map(|w| w.as_ref().to_string()).collect() };
        DialogExample {
            story: story.into_iter().map(to_strings).collect(),
            query: to_strings(query),
            answer: to_strings(answer),
            dialog_id,
        }
    }
}
