use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use embedding::{TokenEmbedding, TokenEmbeddingConfig};

fn build_config(vocab_size: usize, hidden_dim: usize) -> TokenEmbeddingConfig {
    TokenEmbeddingConfig {
        vocab_size,
        hidden_dim,
        dtype: DType::F32,
        device: Device::Cpu,
    }
}

#[test]
fn lookup_produces_batch_seq_hidden() -> Result<()> {
    let embedding = TokenEmbedding::new(build_config(12, 6))?;
    assert_eq!(embedding.config().vocab_size, 12);
    let ids = Tensor::from_slice(&[0u32, 3, 7, 11, 1, 2], (2, 3), &Device::Cpu)?;

    let output = embedding.forward(&ids)?;

    assert_eq!(output.dims(), &[2, 3, 6]);
    assert_eq!(output.dtype(), DType::F32);
    Ok(())
}

#[test]
fn lookup_rows_match_the_table() -> Result<()> {
    let embedding = TokenEmbedding::new(build_config(8, 4))?;
    let ids = Tensor::from_slice(&[5u32], (1, 1), &Device::Cpu)?;

    let row = embedding.forward(&ids)?.flatten_all()?.to_vec1::<f32>()?;
    let table_row = embedding
        .weight()
        .narrow(0, 5, 1)?
        .flatten_all()?
        .to_vec1::<f32>()?;

    assert_eq!(row, table_row);
    Ok(())
}

#[test]
fn out_of_range_ids_are_rejected() -> Result<()> {
    let embedding = TokenEmbedding::new(build_config(4, 4))?;
    let ids = Tensor::from_slice(&[0u32, 4], (1, 2), &Device::Cpu)?;
    assert!(embedding.forward(&ids).is_err());
    Ok(())
}

#[test]
fn float_ids_are_rejected() -> Result<()> {
    let embedding = TokenEmbedding::new(build_config(4, 4))?;
    let ids = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
    assert!(embedding.forward(&ids).is_err());
    Ok(())
}

#[test]
fn tied_readout_projects_to_vocab_width() -> Result<()> {
    let embedding = TokenEmbedding::new(build_config(10, 4))?;
    let hidden = Tensor::randn(0f32, 1.0, (2, 3, 4), &Device::Cpu)?;

    let logits = embedding.linear_out(&hidden)?;

    assert_eq!(logits.dims(), &[2, 3, 10]);
    Ok(())
}

#[test]
fn tied_readout_uses_the_embedding_weight() -> Result<()> {
    let embedding = TokenEmbedding::new(build_config(6, 3))?;
    // Feeding the first table row through the readout must score that row as
    // its own squared norm.
    let first_row = embedding.weight().narrow(0, 0, 1)?.reshape((1, 1, 3))?;
    let logits = embedding.linear_out(&first_row)?;
    let scores = logits.flatten_all()?.to_vec1::<f32>()?;

    let row = embedding
        .weight()
        .narrow(0, 0, 1)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    let norm_sq: f32 = row.iter().map(|value| value * value).sum();

    assert!((scores[0] - norm_sq).abs() < 1e-5);
    Ok(())
}

#[test]
fn degenerate_configurations_fail() {
    assert!(TokenEmbedding::new(build_config(0, 4)).is_err());
    assert!(TokenEmbedding::new(build_config(4, 0)).is_err());
}

#[test]
fn named_parameters_expose_the_table() -> Result<()> {
    let embedding = TokenEmbedding::new(build_config(4, 4))?;
    let params = embedding.named_parameters("");
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].0, "wte.weight");
    assert_eq!(params[0].1.dims(), &[4, 4]);
    Ok(())
}
