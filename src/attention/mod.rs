//! # Hierarchical copy attention
//!
//! Attention over a dialogue history stored at two granularities: a *line memory* with one vector
//! per sentence and a *word memory* with one vector per word of every sentence.
//!
//! - `HierarchicalAttention` scores a decoder query against both memories. The sentence alignment
//! is obtained from a `Normalizer` (softmax, hardmax or sparsemax) over masked sentence scores and
//! weights the word scores, giving a distribution over all `(sentence, word)` pairs.
//! - `AttentionWrapper` wraps a base `RecurrentCell`: every step mixes the previous attention into
//! the cell input, runs the cell, attends over the memories and computes a copy gate `p_gen`.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_memn2n::attention::{
//!     AttentionWrapper, CellInputMixer, HierarchicalAttention, HierarchicalAttentionConfig,
//! };
//! use rust_memn2n::cell::LstmCell;
//! use tch::{nn, Device, Kind, Tensor};
//!
//! let vs = nn::VarStore::new(Device::Cpu);
//! let config = HierarchicalAttentionConfig {
//!     num_units: 32,
//!     memory_depth: 32,
//!     ..Default::default()
//! };
//! let mechanism = HierarchicalAttention::new(&vs.root() / "attention", &config);
//! let line_memory = Tensor::rand([4, 10, 32], (Kind::Float, Device::Cpu));
//! let word_memory = Tensor::rand([4, 10, 6, 32], (Kind::Float, Device::Cpu));
//! let memory = mechanism.prepare(&line_memory, &word_memory, None, None)?;
//!
//! let cell = Box::new(LstmCell::new(&vs.root() / "cell", 16 + 32, 32));
//! let wrapper = AttentionWrapper::new(
//!     &vs.root() / "wrapper",
//!     cell,
//!     vec![mechanism],
//!     &Default::default(),
//!     CellInputMixer::Concat,
//! )?;
//! let attention_cell = wrapper.bind(vec![memory], None)?;
//! let state = attention_cell.initial_state(None);
//! let (output, state) = attention_cell.call(&Tensor::rand([4, 16], (Kind::Float, Device::Cpu)), state)?;
//! # Ok(())
//! # }
//! ```

mod mechanism;
mod memory;
mod normalizer;
mod state;
mod wrapper;

pub use mechanism::{HierarchicalAttention, HierarchicalAttentionConfig, PreparedMemory};
pub use memory::{maybe_mask_score, prepare_memory, sequence_mask};
pub use normalizer::{hardmax, sparsemax, Normalizer, WordScoreNormalization};
pub use state::{AlignmentHistory, AttentionState};
pub use wrapper::{
    AttentionCell, AttentionWrapper, AttentionWrapperConfig, CellInputMixer, WrapperOutput,
};
