//! # Base recurrent cells
//!
//! Single-step recurrent cells wrapped by the attention decoder. The `RecurrentCell` trait exposes
//! the sizes the attention wrapper needs at construction time and a `step` consuming a 2D input
//! `[batch_size, input_size]`. Cell states are carried as a `CellState`, squeezed to
//! `[batch_size, hidden_size]` tensors.

mod cells;

pub use cells::{CellType, GruCell, LstmCell};

use crate::Memn2nError;
use tch::Tensor;

/// # Recurrent cell advanced one time step at a time
pub trait RecurrentCell: std::fmt::Debug {
    /// Width of the 2D input expected by `step`
    fn input_size(&self) -> i64;

    /// Width of the output returned by `step`
    fn output_size(&self) -> i64;

    /// Total width of the state tensors (e.g. `2 * hidden_size` for an LSTM)
    fn state_size(&self) -> i64;

    fn zero_state(&self, batch_size: i64) -> CellState;

    fn step(&self, input: &Tensor, state: &CellState) -> Result<(Tensor, CellState), Memn2nError>;
}

/// # State of a base recurrent cell
#[derive(Debug)]
pub enum CellState {
    Lstm { c: Tensor, h: Tensor },
    Gru { h: Tensor },
}

impl CellState {
    /// Hidden state `[batch_size, hidden_size]`
    pub fn hidden(&self) -> &Tensor {
        match self {
            CellState::Lstm { h, .. } => h,
            CellState::Gru { h } => h,
        }
    }

    /// State tensors, memory cell first for LSTM states
    pub fn tensors(&self) -> Vec<&Tensor> {
        match self {
            CellState::Lstm { c, h } => vec![c, h],
            CellState::Gru { h } => vec![h],
        }
    }

    pub fn batch_size(&self) -> i64 {
        self.hidden().size()[0]
    }

    pub fn shallow_clone(&self) -> CellState {
        match self {
            CellState::Lstm { c, h } => CellState::Lstm {
                c: c.shallow_clone(),
                h: h.shallow_clone(),
            },
            CellState::Gru { h } => CellState::Gru {
                h: h.shallow_clone(),
            },
        }
    }

    /// Fails if the variant or any tensor shape differs from `other`.
    pub fn check_same_structure(&self, other: &CellState) -> Result<(), Memn2nError> {
        let same_variant = matches!(
            (self, other),
            (CellState::Lstm { .. }, CellState::Lstm { .. })
                | (CellState::Gru { .. }, CellState::Gru { .. })
        );
        let same_shapes = self
            .tensors()
            .iter()
            .zip(other.tensors().iter())
            .all(|(left, right)| left.size() == right.size());
        if same_variant && same_shapes {
            Ok(())
        } else {
            Err(Memn2nError::ShapeError(format!(
                "Cell state structure changed between steps: {:?} vs {:?}",
                self.tensors().iter().map(|t| t.size()).collect::<Vec<_>>(),
                other.tensors().iter().map(|t| t.size()).collect::<Vec<_>>()
            )))
        }
    }

    /// Keeps the `previous` values for batch elements flagged in `finished` (`[batch_size]` boolean).
    pub fn hold_finished(
        self,
        previous: &CellState,
        finished: &Tensor,
    ) -> Result<CellState, Memn2nError> {
        self.check_same_structure(previous)?;
        Ok(match (self, previous) {
            (CellState::Lstm { c, h }, CellState::Lstm { c: prev_c, h: prev_h }) => {
                CellState::Lstm {
                    c: hold_finished(&c, prev_c, finished),
                    h: hold_finished(&h, prev_h, finished),
                }
            }
            (CellState::Gru { h }, CellState::Gru { h: prev_h }) => CellState::Gru {
                h: hold_finished(&h, prev_h, finished),
            },
            _ => unreachable!(),
        })
    }
}

/// Selects `previous` rows where `finished` is set and `new` rows elsewhere.
pub(crate) fn hold_finished(new: &Tensor, previous: &Tensor, finished: &Tensor) -> Tensor {
    let mut mask_shape = vec![finished.size()[0]];
    mask_shape.extend(vec![1; new.dim() - 1]);
    previous.where_self(&finished.view(mask_shape.as_slice()), new)
}
