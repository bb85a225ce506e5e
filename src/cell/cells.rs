// Copyright 2020 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::cell::{CellState, RecurrentCell};
use crate::Memn2nError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::nn::{GRUState, LSTMState, RNN};
use tch::{nn, Device, Kind, Tensor};

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
/// # Base recurrent cell type
pub enum CellType {
    lstm,
    gru,
}

impl CellType {
    pub fn build<'p, P>(
        &self,
        p: P,
        input_size: i64,
        hidden_size: i64,
    ) -> Box<dyn RecurrentCell + Send>
    where
        P: Borrow<nn::Path<'p>>,
    {
        match self {
            CellType::lstm => Box::new(LstmCell::new(p, input_size, hidden_size)),
            CellType::gru => Box::new(GruCell::new(p, input_size, hidden_size)),
        }
    }
}

fn check_input(input: &Tensor, input_size: i64, batch_size: i64) -> Result<(), Memn2nError> {
    let input_shape = input.size();
    if input_shape != [batch_size, input_size] {
        return Err(Memn2nError::ShapeError(format!(
            "Recurrent cell expected input of shape [{}, {}], got {:?}",
            batch_size, input_size, input_shape
        )));
    }
    Ok(())
}

#[derive(Debug)]
/// # LSTM cell
pub struct LstmCell {
    lstm: nn::LSTM,
    input_size: i64,
    hidden_size: i64,
    device: Device,
}

impl LstmCell {
    pub fn new<'p, P>(p: P, input_size: i64, hidden_size: i64) -> LstmCell
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let lstm = nn::lstm(p / "lstm", input_size, hidden_size, Default::default());
        LstmCell {
            lstm,
            input_size,
            hidden_size,
            device: p.device(),
        }
    }
}

impl RecurrentCell for LstmCell {
    fn input_size(&self) -> i64 {
        self.input_size
    }

    fn output_size(&self) -> i64 {
        self.hidden_size
    }

    fn state_size(&self) -> i64 {
        2 * self.hidden_size
    }

    fn zero_state(&self, batch_size: i64) -> CellState {
        CellState::Lstm {
            c: Tensor::zeros([batch_size, self.hidden_size], (Kind::Float, self.device)),
            h: Tensor::zeros([batch_size, self.hidden_size], (Kind::Float, self.device)),
        }
    }

    fn step(&self, input: &Tensor, state: &CellState) -> Result<(Tensor, CellState), Memn2nError> {
        let (c, h) = match state {
            CellState::Lstm { c, h } => (c, h),
            CellState::Gru { .. } => {
                return Err(Memn2nError::ShapeError(
                    "LSTM cell received a GRU state".to_string(),
                ))
            }
        };
        check_input(input, self.input_size, h.size()[0])?;

        let lstm_state = LSTMState((h.unsqueeze(0), c.unsqueeze(0)));
        let next_state = self.lstm.step(input, &lstm_state);
        let h = next_state.h().squeeze_dim(0);
        let c = next_state.c().squeeze_dim(0);
        Ok((h.shallow_clone(), CellState::Lstm { c, h }))
    }
}

#[derive(Debug)]
/// # GRU cell
pub struct GruCell {
    gru: nn::GRU,
    input_size: i64,
    hidden_size: i64,
    device: Device,
}

impl GruCell {
    pub fn new<'p, P>(p: P, input_size: i64, hidden_size: i64) -> GruCell
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let gru = nn::gru(p / "gru", input_size, hidden_size, Default::default());
        GruCell {
            gru,
            input_size,
            hidden_size,
            device: p.device(),
        }
    }
}

impl RecurrentCell for GruCell {
    fn input_size(&self) -> i64 {
        self.input_size
    }

    fn output_size(&self) -> i64 {
        self.hidden_size
    }

    fn state_size(&self) -> i64 {
        self.hidden_size
    }

    fn zero_state(&self, batch_size: i64) -> CellState {
        CellState::Gru {
            h: Tensor::zeros([batch_size, self.hidden_size], (Kind::Float, self.device)),
        }
    }

    fn step(&self, input: &Tensor, state: &CellState) -> Result<(Tensor, CellState), Memn2nError> {
        let h = match state {
            CellState::Gru { h } => h,
            CellState::Lstm { .. } => {
                return Err(Memn2nError::ShapeError(
                    "GRU cell received an LSTM state".to_string(),
                ))
            }
        };
        check_input(input, self.input_size, h.size()[0])?;

        let next_state = self.gru.step(input, &GRUState(h.unsqueeze(0)));
        let h = next_state.value().squeeze_dim(0);
        Ok((h.shallow_clone(), CellState::Gru { h }))
    }
}
