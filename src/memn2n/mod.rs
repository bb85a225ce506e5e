//! # End-to-end memory network dialogue model
//!
//! MemN2N encoder over the dialogue history paired with a hierarchical copy attention decoder.
//! The model returns the raw decoding outputs (vocabulary logits, sample ids, word alignments and
//! copy gates): the mixture of generation and copy probabilities and the training loss are left to
//! the caller.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_memn2n::data::{Batch, DataConfig, DialogData};
//! use rust_memn2n::memn2n::{MemN2NDialogConfig, MemN2NDialogModel};
//! use tch::{nn, Device};
//! # use std::collections::HashMap;
//! # let word_idx: HashMap<String, i64> = HashMap::new();
//! # let decoder_vocab: HashMap<String, i64> = HashMap::new();
//! # let examples = vec![];
//!
//! let data = DialogData::new(examples, &word_idx, &decoder_vocab, &DataConfig::default())?;
//! let batch = Batch::new(&data, 0, 8, 0, false)?;
//!
//! let vs = nn::VarStore::new(Device::cuda_if_available());
//! let model = MemN2NDialogModel::new(&vs.root() / "memn2n", &MemN2NDialogConfig::default())?;
//! let output = tch::no_grad(|| model.generate(&batch.to_tensors(vs.device())))?;
//! let generated_ids = output.outputs.sample_id;
//! # Ok(())
//! # }
//! ```

mod memn2n_model;

pub use memn2n_model::{MemN2NDialogConfig, MemN2NDialogModel};
