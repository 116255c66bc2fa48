//! Activation catalogue for transformer feed-forward stacks.
//!
//! Activations consume tensors shaped as `(batch, seq, hidden)` and return
//! tensors with identical layout. Each evaluation promotes inputs to the
//! compute dtype requested by [`PrecisionPolicy`] before applying the
//! non-linearity, then casts the result back to the storage dtype so callers
//! can chain additional mixed-precision aware operations.
//!
//! GELU uses the erf-based formula `0.5 * x * (1 + erf(x / sqrt(2)))`; SiLU
//! computes `x * sigmoid(x)` via the fused kernel exposed by Candle.

use candle_core::{Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Non-linearities available to the feed-forward stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    /// GeLU in the erf formulation used by GPT style models.
    Gelu,
    /// ReLU, zeroing out negative values.
    Relu,
    /// Standard SiLU (a.k.a. swish) activation.
    Silu,
}

impl ActivationKind {
    /// Applies the activation to `input` using the precision rules in `policy`.
    pub fn apply(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let compute = policy.cast_for_matmul(input)?;
        let activated = match self {
            ActivationKind::Gelu => compute.gelu_erf()?,
            ActivationKind::Relu => compute.relu()?,
            ActivationKind::Silu => compute.silu()?,
        };
        policy.cast_to_storage(&activated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    fn policy() -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(DType::F32)
    }

    #[test]
    fn gelu_matches_reference_formula() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], (5,), &device)?;
        let output = ActivationKind::Gelu.apply(&input, &policy())?;

        let reference = {
            let scaled = input.affine(1.0 / SQRT_2, 0.0)?;
            let erf = scaled.erf()?;
            let gate = erf.affine(0.5, 0.5)?;
            input.mul(&gate)?
        };

        let diff = output
            .sub(&reference)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }

    #[test]
    fn relu_zeroes_negative_values() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-1.0f32, -0.25, 0.0, 0.5, 2.0], (5,), &device)?;
        let output = ActivationKind::Relu.apply(&input, &policy())?;
        let values = output.to_vec1::<f32>()?;
        assert_eq!(values, vec![0.0, 0.0, 0.0, 0.5, 2.0]);
        Ok(())
    }

    #[test]
    fn activations_preserve_shape_and_storage_dtype() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::randn(0f32, 1.0, (2, 3, 4), &device)?.to_dtype(DType::F16)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        for kind in [ActivationKind::Gelu, ActivationKind::Relu, ActivationKind::Silu] {
            let output = kind.apply(&input, &policy)?;
            assert_eq!(output.dims(), input.dims());
            assert_eq!(output.dtype(), DType::F16);
        }
        Ok(())
    }
}
