use candle_core::{Device, Result};

use super::build_causal_mask;

#[test]
fn square_mask_is_lower_triangular() -> Result<()> {
    let device = Device::Cpu;
    let mask = build_causal_mask(&device, 1, 1, 4, 4)?;
    assert_eq!(mask.dims(), &[1, 1, 4, 4]);

    let rows = mask.flatten_all()?.to_vec1::<f32>()?;
    for q in 0..4 {
        for k in 0..4 {
            let value = rows[q * 4 + k];
            if k <= q {
                assert_eq!(value, 0.0, "position ({q}, {k}) should be visible");
            } else {
                assert_eq!(
                    value,
                    f32::NEG_INFINITY,
                    "position ({q}, {k}) should be masked"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn extended_prefix_shifts_the_diagonal() -> Result<()> {
    let device = Device::Cpu;
    // Two queries aligned with the last two of five keys.
    let mask = build_causal_mask(&device, 1, 1, 2, 5)?;
    let rows = mask.flatten_all()?.to_vec1::<f32>()?;

    // Query 0 sees keys [0, 3]; query 1 sees all five.
    for k in 0..5 {
        let first = rows[k];
        let second = rows[5 + k];
        if k <= 3 {
            assert_eq!(first, 0.0);
        } else {
            assert_eq!(first, f32::NEG_INFINITY);
        }
        assert_eq!(second, 0.0);
    }
    Ok(())
}

#[test]
fn batch_and_head_axes_replicate_the_pattern() -> Result<()> {
    let device = Device::Cpu;
    let mask = build_causal_mask(&device, 2, 3, 4, 4)?;
    assert_eq!(mask.dims(), &[2, 3, 4, 4]);

    let base = build_causal_mask(&device, 1, 1, 4, 4)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    let all = mask.flatten_all()?.to_vec1::<f32>()?;
    for chunk in all.chunks(16) {
        assert_eq!(chunk, base.as_slice());
    }
    Ok(())
}
