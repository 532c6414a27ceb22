//! End-to-end tests for the ConvLSTM predictor and its weights.
//!
//! Each test exercises: config -> model -> checkpoint file -> shared
//! weights -> execution backend -> prediction, and training back into a
//! checkpoint.

use firegraph::nn::{
    load_checkpoint_file, parse_checkpoint, save_checkpoint, AdamConfig, RayonBackend,
    SequentialBackend,
};
use firegraph::{
    Activation, BackendKind, CellState, ConvLstm, ConvLstmCell, ConvLstmConfig, Error, SharedModel,
    TrainConfig, Trainer,
};
use ndarray::{Array4, Array5};
use pretty_assertions::assert_eq;
use serde_json::json;

fn config() -> ConvLstmConfig {
    ConvLstmConfig {
        input_dim: 2,
        hidden_dims: vec![4, 3],
        kernel_size: 3,
        output_len: 2,
        activation: Activation::Sigmoid,
        bias: true,
    }
}

fn input(batch: usize) -> Array5<f32> {
    Array5::from_shape_fn((batch, 3, 2, 5, 5), |(b, t, c, y, x)| {
        ((b * 31 + t * 7 + c * 3 + y * 5 + x) % 11) as f32 / 11.0
    })
}

// ============================================================================
// 1. Cell
// ============================================================================

#[test]
fn test_zero_input_zero_state_gives_zero_state() {
    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(1);
    let cell = ConvLstmCell::new(3, 4, 3, false, &mut rng).unwrap();
    let x = Array4::<f32>::zeros((2, 3, 6, 6));
    let next = cell.forward(x.view(), &CellState::zeros(2, 4, (6, 6))).unwrap();
    assert!(next.hidden.iter().all(|&v| v == 0.0));
    assert!(next.cell.iter().all(|&v| v == 0.0));
}

// ============================================================================
// 2. Predictor
// ============================================================================

#[test]
fn test_prediction_shape_and_range() {
    let model = ConvLstm::new(config(), 7).unwrap();
    let out = model.forward(input(2).view()).unwrap();
    assert_eq!(out.dim(), (2, 2, 2, 5, 5));
    assert!(out.iter().all(|&v| v > 0.0 && v < 1.0));
}

#[test]
fn test_same_seed_same_weights() {
    let a = ConvLstm::new(config(), 99).unwrap();
    let b = ConvLstm::new(config(), 99).unwrap();
    let c = ConvLstm::new(config(), 100).unwrap();
    assert_eq!(a.state_dict(), b.state_dict());
    assert!(a.state_dict() != c.state_dict());
}

#[test]
fn test_batch_elements_are_independent() {
    let model = ConvLstm::new(config(), 5).unwrap();
    let both = model.forward(input(2).view()).unwrap();
    let first = model.forward(input(1).view()).unwrap();
    assert_eq!(both.index_axis(ndarray::Axis(0), 0), first.index_axis(ndarray::Axis(0), 0));
}

#[test]
fn test_wrong_channel_count() {
    let model = ConvLstm::new(config(), 5).unwrap();
    let bad = Array5::<f32>::zeros((1, 2, 3, 4, 4));
    assert!(matches!(model.forward(bad.view()), Err(Error::ShapeMismatch { .. })));
}

// ============================================================================
// 3. Checkpoints
// ============================================================================

#[test]
fn test_checkpoint_missing_one_key_loads_the_rest() {
    let trained = ConvLstm::new(config(), 21).unwrap();
    let mut dict = trained.state_dict();
    dict.remove("convlstm.conv_out.bias");

    let mut model = ConvLstm::zeroed(config()).unwrap();
    let report = model.load_state_dict(&dict).unwrap();
    assert_eq!(report.missing, vec!["convlstm.conv_out.bias"]);
    assert!(report.unexpected.is_empty());
    assert_eq!(report.loaded.len(), 5);

    let loaded = model.state_dict();
    for (name, record) in &dict {
        assert_eq!(&loaded[name], record, "{name}");
    }
    assert!(loaded["convlstm.conv_out.bias"].data.iter().all(|&v| v == 0.0));
}

#[test]
fn test_wrapped_and_bare_checkpoints_load_identically() {
    let trained = ConvLstm::new(config(), 4).unwrap();
    let bare = serde_json::to_value(
        trained.state_dict().into_iter().collect::<std::collections::BTreeMap<_, _>>(),
    )
    .unwrap();
    let wrapped = json!({ "state_dict": bare.clone(), "epoch": 12 });

    let mut a = ConvLstm::zeroed(config()).unwrap();
    let mut b = ConvLstm::zeroed(config()).unwrap();
    a.load_state_dict(&parse_checkpoint(bare).unwrap()).unwrap();
    b.load_state_dict(&parse_checkpoint(wrapped).unwrap()).unwrap();
    assert_eq!(a.state_dict(), b.state_dict());
    assert_eq!(a.state_dict(), trained.state_dict());
}

#[test]
fn test_checkpoint_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("convlstm.json");
    let trained = ConvLstm::new(config(), 8).unwrap();
    save_checkpoint(&trained, &path).unwrap();
    assert_eq!(load_checkpoint_file(&path).unwrap(), trained.state_dict());
}

#[test]
fn test_malformed_checkpoint_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(load_checkpoint_file(&path), Err(Error::CheckpointFormat(_))));
}

// ============================================================================
// 4. Shared weights and backends
// ============================================================================

#[test]
fn test_shared_model_sees_reloaded_weights() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.json");
    let trained = ConvLstm::new(config(), 13).unwrap();
    save_checkpoint(&trained, &path).unwrap();

    let shared = SharedModel::new(ConvLstm::new(config(), 0).unwrap());
    let x = input(1);
    let before = shared.forward(&SequentialBackend, x.view()).unwrap();
    shared.load_checkpoint(&path).unwrap();
    let after = shared.forward(&SequentialBackend, x.view()).unwrap();

    assert!(before != after);
    assert_eq!(after, trained.forward(x.view()).unwrap());
}

#[test]
fn test_backends_agree() {
    let shared = SharedModel::new(ConvLstm::new(config(), 3).unwrap());
    let x = input(4);
    let sequential = shared.forward(&SequentialBackend, x.view()).unwrap();
    let pooled = shared.forward(&RayonBackend::new(Some(3)).unwrap(), x.view()).unwrap();
    let configured = BackendKind::Rayon { threads: None }.build().unwrap();
    let global = shared.forward(configured.as_ref(), x.view()).unwrap();
    assert_eq!(sequential, pooled);
    assert_eq!(sequential, global);
}

#[test]
fn test_update_under_write_lock() {
    let shared = SharedModel::new(ConvLstm::zeroed(config()).unwrap());
    let trained = ConvLstm::new(config(), 2).unwrap();
    let report = shared.update(|m| m.load_state_dict(&trained.state_dict())).unwrap();
    assert!(report.is_complete());
    assert_eq!(shared.with_model(|m| m.state_dict()), trained.state_dict());
}

// ============================================================================
// 5. Training
// ============================================================================

/// A gaussian blob stepping one column right per frame.
fn moving_blob(start: usize, frames: usize) -> Array4<f32> {
    Array4::from_shape_fn((frames, 1, 6, 6), |(t, _, y, x)| {
        let dx = x as f32 - (start + t) as f32;
        let dy = y as f32 - 2.5;
        (-(dx * dx + dy * dy) / 2.0).exp()
    })
}

fn blob_config() -> ConvLstmConfig {
    ConvLstmConfig {
        input_dim: 1,
        hidden_dims: vec![4],
        kernel_size: 3,
        output_len: 1,
        activation: Activation::Sigmoid,
        bias: true,
    }
}

#[test]
fn test_training_lowers_loss_and_checkpoint_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trained.json");
    let windows: Vec<_> = (0..3).map(|start| moving_blob(start, 4)).collect();

    let model = SharedModel::new(ConvLstm::new(blob_config(), 17).unwrap());
    let mut trainer = Trainer::new(TrainConfig {
        epochs: 12,
        batch_size: 3,
        optimizer: AdamConfig { learning_rate: 0.02, ..AdamConfig::default() },
        max_grad_norm: Some(5.0),
        checkpoint: Some(path.clone()),
    })
    .unwrap();
    let report = trainer.fit(&model, &windows).unwrap();

    assert_eq!(report.epoch_losses.len(), 12);
    assert_eq!(trainer.optimizer().steps(), 12);
    let first = report.epoch_losses[0];
    let last = report.final_loss().unwrap();
    assert!(last < first, "loss did not decrease: {first} -> {last}");
    assert_eq!(report.checkpoint.as_deref(), Some(path.as_path()));

    let restored = SharedModel::new(ConvLstm::zeroed(blob_config()).unwrap());
    let loaded = restored.load_checkpoint(&path).unwrap();
    assert!(loaded.is_complete());
    assert!(loaded.loaded.iter().any(|name| name == "convlstm.cell_list.0.conv.weight"));

    let context = moving_blob(1, 3).insert_axis(ndarray::Axis(0));
    assert_eq!(
        restored.forward(&SequentialBackend, context.view()).unwrap(),
        model.forward(&SequentialBackend, context.view()).unwrap(),
    );
}

#[test]
fn test_training_needs_next_frame_model() {
    // config() predicts two frames; next-frame training wants one
    let model = SharedModel::new(ConvLstm::zeroed(config()).unwrap());
    let mut trainer = Trainer::new(TrainConfig { epochs: 1, ..TrainConfig::default() }).unwrap();
    let window = Array4::<f32>::zeros((3, 2, 4, 4));
    assert!(matches!(trainer.fit(&model, &[window]), Err(Error::Configuration(_))));
}
