//! Memory-augmented dialogue decoding built on [tch-rs](https://github.com/LaurentMazare/tch-rs).
//!
//! This crate implements an end-to-end memory network (MemN2N) encoder over a dialogue history
//! paired with a recurrent decoder that can copy out-of-vocabulary words from the history. It is
//! made of the following building blocks, from the bottom up:
//!
//! - [`attention`]: hierarchical (sentence then word) attention over a line memory and a word
//!   memory, and an `AttentionWrapper` around a recurrent cell computing a copy gate at every step
//! - [`cell`]: LSTM and GRU base cells advanced one step at a time
//! - [`decoder`]: a step decoder with teacher forcing, greedy and sampling helpers, and
//!   `dynamic_decode` running it until every batch element is finished
//! - [`data`]: vectorization of tokenized dialogues with per-dialogue out-of-vocabulary ids
//! - [`memn2n`]: the end-to-end dialogue model
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_memn2n::data::{Batch, DataConfig, DialogData, DialogExample};
//! use rust_memn2n::memn2n::{MemN2NDialogConfig, MemN2NDialogModel};
//! use std::collections::HashMap;
//! use tch::{nn, Device};
//!
//! # let word_idx: HashMap<String, i64> = HashMap::new();
//! # let decoder_vocab: HashMap<String, i64> = HashMap::new();
//! let examples = vec![DialogExample::new(
//!     vec![vec!["hello", "what", "can", "i", "help", "you", "with", "today"]],
//!     vec!["book", "a", "table", "at", "the_fancy_pub"],
//!     vec!["the_fancy_pub", "is", "booked"],
//!     0,
//! )];
//! let data = DialogData::new(examples, &word_idx, &decoder_vocab, &DataConfig::default())?;
//! let batch = Batch::new(&data, 0, 1, 0, false)?;
//!
//! let vs = nn::VarStore::new(Device::Cpu);
//! let model = MemN2NDialogModel::new(&vs.root() / "memn2n", &MemN2NDialogConfig::default())?;
//! let output = model.generate(&batch.to_tensors(Device::Cpu))?;
//!
//! // Most attended history word for the first generated token
//! let position = output.word_alignments[0].get(0).get(0).argmax(-1, false).int64_value(&[]);
//! let copied_word = batch.source_word(0, position as usize);
//! # Ok(())
//! # }
//! ```

pub mod attention;
pub mod cell;
pub mod common;
pub mod data;
pub mod decoder;
pub mod memn2n;

pub use common::error::Memn2nError;
pub use common::Config;
