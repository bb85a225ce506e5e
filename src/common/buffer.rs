use crate::Memn2nError;
use tch::{Device, Kind, Tensor};

/// # Append-only, time-indexed tensor buffer
/// Collects one tensor per decoding step and stacks them into a single time-major tensor once
/// decoding is done. Pre-sized to the maximum number of steps when it is known.
#[derive(Debug)]
pub struct TimeBuffer {
    values: Vec<Tensor>,
    element_shape: Vec<i64>,
    options: (Kind, Device),
}

impl TimeBuffer {
    pub fn new(element_shape: &[i64], options: (Kind, Device), capacity: Option<i64>) -> TimeBuffer {
        let values = match capacity {
            Some(capacity) if capacity > 0 => Vec::with_capacity(capacity as usize),
            _ => Vec::new(),
        };
        TimeBuffer {
            values,
            element_shape: element_shape.to_vec(),
            options,
        }
    }

    pub fn len(&self) -> i64 {
        self.values.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn element_shape(&self) -> &[i64] {
        &self.element_shape
    }

    /// Appends the value for step `time`. Steps must be written in order, exactly once.
    pub fn write(&mut self, time: i64, value: &Tensor) -> Result<(), Memn2nError> {
        if time != self.len() {
            return Err(Memn2nError::ShapeError(format!(
                "Time buffer holds {} steps, cannot write step {}",
                self.len(),
                time
            )));
        }
        if value.size() != self.element_shape {
            return Err(Memn2nError::ShapeError(format!(
                "Time buffer elements must be shaped {:?}, got {:?} at step {}",
                self.element_shape,
                value.size(),
                time
            )));
        }
        self.values.push(value.shallow_clone());
        Ok(())
    }

    pub fn read(&self, time: i64) -> Option<&Tensor> {
        if time < 0 {
            return None;
        }
        self.values.get(time as usize)
    }

    /// Stacks the buffer into `[time, element_shape...]`.
    pub fn stack(&self) -> Tensor {
        if self.values.is_empty() {
            let mut shape = vec![0];
            shape.extend_from_slice(&self.element_shape);
            Tensor::zeros(shape.as_slice(), self.options)
        } else {
            Tensor::stack(&self.values, 0)
        }
    }

    pub fn shallow_clone(&self) -> TimeBuffer {
        TimeBuffer {
            values: self.values.iter().map(|value| value.shallow_clone()).collect(),
            element_shape: self.element_shape.clone(),
            options: self.options,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stacks_in_time_order() -> anyhow::Result<()> {
        let mut buffer = TimeBuffer::new(&[2], (Kind::Float, Device::Cpu), Some(3));
        for time in 0..3 {
            buffer.write(time, &Tensor::full([2], time as f64, (Kind::Float, Device::Cpu)))?;
        }
        let stacked = buffer.stack();
        assert_eq!(stacked.size(), vec![3, 2]);
        assert_eq!(stacked.double_value(&[2, 1]), 2.0);
        assert_eq!(buffer.read(1).map(|value| value.double_value(&[0])), Some(1.0));
        Ok(())
    }

    #[test]
    fn rejects_out_of_order_and_misshaped_writes() -> anyhow::Result<()> {
        let mut buffer = TimeBuffer::new(&[2], (Kind::Float, Device::Cpu), None);
        let value = Tensor::zeros([2], (Kind::Float, Device::Cpu));
        assert!(buffer.write(1, &value).is_err());
        buffer.write(0, &value)?;
        assert!(buffer
            .write(1, &Tensor::zeros([3], (Kind::Float, Device::Cpu)))
            .is_err());
        Ok(())
    }

    #[test]
    fn empty_buffer_stacks_to_zero_steps() {
        let buffer = TimeBuffer::new(&[4, 5], (Kind::Float, Device::Cpu), Some(0));
        assert!(buffer.is_empty());
        assert_eq!(buffer.stack().size(), vec![0, 4, 5]);
    }
}
