//! # Step decoding
//!
//! A `Decoder` exposes an `initialize` and a `step` function. `dynamic_decode` drives it in a host
//! loop until every batch element is finished, collecting step outputs, alignments and copy gates
//! in time-indexed buffers.
//!
//! - `BasicDecoder` runs an `AttentionCell`, projects its output with an optional output layer and
//! delegates sampling and next-input selection to a `Helper`.
//! - Available helpers are `TeacherForcingHelper` (ground-truth inputs), `GreedyHelper` (argmax
//! fed back) and `SamplingHelper` (multinomial samples fed back).

mod basic_decoder;
mod dynamic_decode;
mod helper;

pub use basic_decoder::{BasicDecoder, BasicDecoderOutput};
pub use dynamic_decode::{dynamic_decode, DecodeConfig, DynamicDecodeOutput};
pub use helper::{GreedyHelper, Helper, SamplingHelper, TeacherForcingHelper};

use crate::Memn2nError;
use tch::Tensor;

/// # State threaded through the decoding loop
pub trait DecodeState: Sized {
    /// Shallow copy used to restore finished batch elements
    fn snapshot(&self) -> Self;

    fn check_same_structure(&self, other: &Self) -> Result<(), Memn2nError>;

    /// Keeps the `previous` values for the batch elements flagged in `finished`.
    fn hold_finished(self, previous: &Self, finished: &Tensor) -> Result<Self, Memn2nError>;
}

/// # Result of a single decoder step
pub struct DecoderStep<S> {
    pub outputs: BasicDecoderOutput,
    /// Sentence alignments, one per attention mechanism
    pub line_alignments: Vec<Tensor>,
    /// Word alignments, one per attention mechanism
    pub word_alignments: Vec<Tensor>,
    pub p_gens: Tensor,
    pub state: S,
    pub next_inputs: Tensor,
    /// `[batch_size]` boolean flags set for elements finishing at this step
    pub finished: Tensor,
}

/// # Decoder driven by `dynamic_decode`
pub trait Decoder {
    type State: DecodeState;

    fn batch_size(&self) -> i64;

    /// Width of the `rnn_output` emitted at every step
    fn output_size(&self) -> i64;

    /// `(sentences, sentences * words)` alignment sizes, one pair per attention mechanism
    fn alignment_sizes(&self) -> Vec<(i64, i64)>;

    /// Returns `(finished, inputs, state)` before the first step.
    fn initialize(&self) -> Result<(Tensor, Tensor, Self::State), Memn2nError>;

    fn step(
        &self,
        time: i64,
        inputs: &Tensor,
        state: Self::State,
    ) -> Result<DecoderStep<Self::State>, Memn2nError>;

    /// Post-processing of the stacked time-major outputs. Passes them through by default.
    fn finalize(
        &self,
        outputs: BasicDecoderOutput,
        state: Self::State,
        _sequence_lengths: &Tensor,
    ) -> Result<(BasicDecoderOutput, Self::State), Memn2nError> {
        Ok((outputs, state))
    }
}
