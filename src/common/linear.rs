// Copyright 2019 Laurent Mazare.
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

use crate::Memn2nError;
use std::borrow::Borrow;
use tch::nn::init::DEFAULT_KAIMING_UNIFORM;
use tch::nn::{Init, Module, Path};
use tch::Tensor;

#[derive(Debug, Clone, Copy)]
pub struct LinearNoBiasConfig {
    pub ws_init: Init,
}

impl Default for LinearNoBiasConfig {
    fn default() -> Self {
        LinearNoBiasConfig {
            ws_init: DEFAULT_KAIMING_UNIFORM,
        }
    }
}

/// Dense projection without bias, used for the memory keys and the attention output layer.
#[derive(Debug)]
pub struct LinearNoBias {
    pub ws: Tensor,
}

pub fn linear_no_bias<'a, T: Borrow<Path<'a>>>(
    vs: T,
    in_dim: i64,
    out_dim: i64,
    c: LinearNoBiasConfig,
) -> LinearNoBias {
    let vs = vs.borrow();
    LinearNoBias {
        ws: vs.var("weight", &[out_dim, in_dim], c.ws_init),
    }
}

impl Module for LinearNoBias {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.matmul(&self.ws.tr())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MultiLinearConfig {
    pub ws_init: Init,
    pub bias: bool,
    pub bias_start: f64,
}

impl Default for MultiLinearConfig {
    fn default() -> Self {
        MultiLinearConfig {
            ws_init: DEFAULT_KAIMING_UNIFORM,
            bias: true,
            bias_start: 0.0,
        }
    }
}

/// # Linear map over a list of 2D arguments
/// Computes `sum_i(args[i] * W[i]) + b` with a single weight matrix spanning the concatenated
/// argument widths.
#[derive(Debug)]
pub struct MultiLinear {
    pub ws: Tensor,
    pub bs: Option<Tensor>,
    total_arg_size: i64,
}

pub fn multi_linear<'a, T: Borrow<Path<'a>>>(
    vs: T,
    total_arg_size: i64,
    output_size: i64,
    c: MultiLinearConfig,
) -> MultiLinear {
    let vs = vs.borrow();
    let bs = if c.bias {
        Some(vs.var("bias", &[output_size], Init::Const(c.bias_start)))
    } else {
        None
    };
    MultiLinear {
        ws: vs.var("weight", &[total_arg_size, output_size], c.ws_init),
        bs,
        total_arg_size,
    }
}

impl MultiLinear {
    pub fn forward(&self, args: &[&Tensor]) -> Result<Tensor, Memn2nError> {
        if args.is_empty() {
            return Err(Memn2nError::ValueError(
                "`args` must be specified".to_string(),
            ));
        }
        let mut total_arg_size = 0;
        for arg in args {
            let shape = arg.size();
            if shape.len() != 2 {
                return Err(Memn2nError::ShapeError(format!(
                    "Linear is expecting 2D arguments, got shape {:?}",
                    shape
                )));
            }
            total_arg_size += shape[1];
        }
        if total_arg_size != self.total_arg_size {
            return Err(Memn2nError::ShapeError(format!(
                "Linear expects a total argument width of {}, got {}",
                self.total_arg_size, total_arg_size
            )));
        }

        let output = if args.len() == 1 {
            args[0].matmul(&self.ws)
        } else {
            Tensor::cat(args, 1).matmul(&self.ws)
        };
        Ok(match &self.bs {
            Some(bias) => output + bias,
            None => output,
        })
    }
}
