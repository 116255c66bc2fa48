use anyhow::Result;
use candle_core::{DType, Device};
use embedding::{PositionEmbedding, PositionEmbeddingConfig};

fn build_config(max_positions: usize, hidden_dim: usize) -> PositionEmbeddingConfig {
    PositionEmbeddingConfig {
        max_positions,
        hidden_dim,
        dtype: DType::F32,
        device: Device::Cpu,
    }
}

#[test]
fn forward_returns_the_leading_rows() -> Result<()> {
    let embedding = PositionEmbedding::new(build_config(8, 4))?;
    assert_eq!(embedding.config().max_positions, 8);

    let rows = embedding.forward(3)?;
    assert_eq!(rows.dims(), &[3, 4]);

    let expected = embedding.weight().narrow(0, 0, 3)?;
    let diff = rows
        .sub(&expected)?
        .abs()?
        .max_all()?
        .to_vec0::<f32>()?;
    assert_eq!(diff, 0.0);
    Ok(())
}

#[test]
fn full_table_is_reachable() -> Result<()> {
    let embedding = PositionEmbedding::new(build_config(5, 2))?;
    let rows = embedding.forward(5)?;
    assert_eq!(rows.dims(), &[5, 2]);
    Ok(())
}

#[test]
fn over_length_requests_fail_without_truncation() -> Result<()> {
    let embedding = PositionEmbedding::new(build_config(4, 2))?;
    assert!(embedding.forward(5).is_err());
    assert!(embedding.forward(0).is_err());
    Ok(())
}

#[test]
fn degenerate_configurations_fail() {
    assert!(PositionEmbedding::new(build_config(0, 2)).is_err());
    assert!(PositionEmbedding::new(build_config(4, 0)).is_err());
}

#[test]
fn named_parameters_expose_the_table() -> Result<()> {
    let embedding = PositionEmbedding::new(build_config(6, 2))?;
    let params = embedding.named_parameters("");
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].0, "wpe.weight");
    assert_eq!(params[0].1.dims(), &[6, 2]);
    Ok(())
}
