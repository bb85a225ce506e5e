use crate::Memn2nError;
use tch::{Kind, Scalar};

/// Most negative finite value representable by `kind`, used to mask scores before normalization.
pub(crate) fn get_negative_infinity(kind: Kind) -> Result<Scalar, Memn2nError> {
    Ok(match kind {
        Kind::Half => Scalar::float(half::f16::MIN.into()),
        Kind::Float => Scalar::float(f32::MIN.into()),
        Kind::BFloat16 => Scalar::float(half::bf16::MIN.into()),
        Kind::Double => Scalar::float(f64::MIN),
        _ => {
            return Err(Memn2nError::ValueError(format!(
                "Type not supported: attempted to get negative infinity for {:?}",
                kind
            )))
        }
    })
}
