//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context} expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    let dims = tensor.dims();
    match dims {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        _ => Err(Error::Msg(format!(
            "{context} expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(context: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().any(|candidate| *candidate == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context} expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Requires the tensor to be contiguous in memory.
pub fn expect_contiguous(context: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{context} must be contiguous in memory")))
    }
}

/// Requires two tensors to share a dtype.
pub fn expect_same_dtype(
    left_context: &str,
    left: &Tensor,
    right_context: &str,
    right: &Tensor,
) -> Result<()> {
    if left.dtype() == right.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{left_context} ({:?}) and {right_context} ({:?}) must share a dtype",
            left.dtype(),
            right.dtype()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn shape_check_accepts_exact_match() -> Result<()> {
        let tensor = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        expect_shape("test.tensor", &tensor, &[2, 3])?;
        assert!(expect_shape("test.tensor", &tensor, &[3, 2]).is_err());
        Ok(())
    }

    #[test]
    fn layout_check_requires_three_axes_and_hidden() -> Result<()> {
        let good = Tensor::zeros((1, 4, 8), DType::F32, &Device::Cpu)?;
        expect_batch_seq_hidden("test.hidden", &good, 8)?;

        let wrong_hidden = Tensor::zeros((1, 4, 6), DType::F32, &Device::Cpu)?;
        assert!(expect_batch_seq_hidden("test.hidden", &wrong_hidden, 8).is_err());

        let wrong_rank = Tensor::zeros((4, 8), DType::F32, &Device::Cpu)?;
        assert!(expect_batch_seq_hidden("test.hidden", &wrong_rank, 8).is_err());
        Ok(())
    }

    #[test]
    fn dtype_check_respects_the_allow_list() -> Result<()> {
        let tensor = Tensor::zeros((2,), DType::F16, &Device::Cpu)?;
        expect_dtype_in("test.dtype", &tensor, &[DType::F16, DType::F32])?;
        assert!(expect_dtype_in("test.dtype", &tensor, &[DType::F32]).is_err());
        Ok(())
    }

    #[test]
    fn contiguity_check_flags_transposed_views() -> Result<()> {
        let tensor = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        expect_contiguous("test.contiguous", &tensor)?;
        let transposed = tensor.t()?;
        assert!(expect_contiguous("test.contiguous", &transposed).is_err());
        Ok(())
    }
}
