//! Checkpoint files: named tensors in JSON.
//!
//! A checkpoint is a JSON object mapping parameter names to
//! `{"shape": [...], "data": [...]}` records, either bare or wrapped as
//! `{"state_dict": {...}}`. Loading is non-strict: missing and unexpected
//! names are reported, not fatal. A name that matches but whose shape does
//! not is an error, and nothing is assigned in that case.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use hashbrown::{HashMap, HashSet};
use ndarray::ArrayViewD;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::convlstm::ConvLstm;
use crate::{Error, Result};

/// Key under which wrapped checkpoints store their tensors.
pub const STATE_DICT_KEY: &str = "state_dict";

/// One named tensor, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    /// Conv weights are 4-D; nothing here goes higher.
    pub shape: SmallVec<[usize; 4]>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    pub fn from_view(view: &ArrayViewD<'_, f32>) -> Self {
        Self {
            shape: SmallVec::from_slice(view.shape()),
            data: view.iter().copied().collect(),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

pub type StateDict = HashMap<String, TensorRecord>;

/// Outcome of a non-strict load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Model parameters the checkpoint did not provide.
    pub missing: Vec<String>,
    /// Checkpoint entries the model has no parameter for.
    pub unexpected: Vec<String>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Interpret a parsed JSON document as a state dict.
pub fn parse_checkpoint(value: serde_json::Value) -> Result<StateDict> {
    let serde_json::Value::Object(mut root) = value else {
        return Err(Error::CheckpointFormat("checkpoint root must be a JSON object".into()));
    };

    let entries = match root.remove(STATE_DICT_KEY) {
        Some(serde_json::Value::Object(inner)) => inner,
        Some(_) => {
            return Err(Error::CheckpointFormat(format!("'{STATE_DICT_KEY}' must be an object")));
        }
        None => root,
    };

    let mut dict = StateDict::with_capacity(entries.len());
    for (name, entry) in entries {
        let record: TensorRecord = serde_json::from_value(entry)
            .map_err(|e| Error::CheckpointFormat(format!("tensor '{name}': {e}")))?;
        if record.numel() != record.data.len() {
            return Err(Error::CheckpointFormat(format!(
                "tensor '{name}': shape {:?} holds {} values, data has {}",
                record.shape,
                record.numel(),
                record.data.len()
            )));
        }
        dict.insert(name, record);
    }
    Ok(dict)
}

pub fn load_checkpoint_file(path: impl AsRef<Path>) -> Result<StateDict> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| Error::CheckpointFormat(format!("{}: {e}", path.display())))?;
    let dict = parse_checkpoint(value)?;
    tracing::debug!(path = %path.display(), tensors = dict.len(), "checkpoint parsed");
    Ok(dict)
}

/// Write the model's parameters in wrapped form, names sorted.
pub fn save_checkpoint(model: &ConvLstm, path: impl AsRef<Path>) -> Result<()> {
    let sorted: BTreeMap<String, TensorRecord> = model.state_dict().into_iter().collect();
    let mut root = serde_json::Map::new();
    root.insert(STATE_DICT_KEY.to_string(), serde_json::to_value(sorted)?);
    fs::write(path.as_ref(), serde_json::to_vec(&serde_json::Value::Object(root))?)?;
    Ok(())
}

// ============================================================================
// Model integration
// ============================================================================

impl ConvLstm {
    /// Snapshot of every parameter under its checkpoint name.
    pub fn state_dict(&self) -> StateDict {
        self.named_parameters()
            .into_iter()
            .map(|(name, view)| {
                let record = TensorRecord::from_view(&view);
                (name, record)
            })
            .collect()
    }

    /// Assign matching tensors. Shapes are checked for every match before
    /// anything is written.
    pub fn load_state_dict(&mut self, dict: &StateDict) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let mut known = HashSet::new();

        for (name, view) in self.named_parameters() {
            match dict.get(&name) {
                Some(record) if record.shape.as_slice() != view.shape() => {
                    return Err(Error::shape(
                        format!("checkpoint tensor '{name}'"),
                        view.shape(),
                        &record.shape,
                    ));
                }
                Some(_) => report.loaded.push(name.clone()),
                None => report.missing.push(name.clone()),
            }
            known.insert(name);
        }

        for (name, mut view) in self.named_parameters_mut() {
            if let Some(record) = dict.get(&name) {
                for (dst, &src) in view.iter_mut().zip(record.data.iter()) {
                    *dst = src;
                }
            }
        }

        report.unexpected = dict.keys().filter(|k| !known.contains(*k)).cloned().collect();
        report.unexpected.sort();

        if !report.missing.is_empty() {
            tracing::warn!(missing = ?report.missing, "checkpoint is missing parameters");
        }
        if !report.unexpected.is_empty() {
            tracing::warn!(unexpected = ?report.unexpected, "checkpoint has unexpected entries");
        }
        tracing::info!(loaded = report.loaded.len(), "checkpoint applied");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::ConvLstmConfig;
    use serde_json::json;

    fn tiny() -> ConvLstmConfig {
        ConvLstmConfig {
            input_dim: 1,
            hidden_dims: vec![2],
            kernel_size: 1,
            output_len: 1,
            ..ConvLstmConfig::default()
        }
    }

    #[test]
    fn test_state_dict_roundtrip_into_fresh_model() {
        let source = ConvLstm::new(tiny(), 5).unwrap();
        let mut target = ConvLstm::zeroed(tiny()).unwrap();
        let report = target.load_state_dict(&source.state_dict()).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.loaded.len(), 4);
        assert_eq!(target.state_dict(), source.state_dict());
    }

    #[test]
    fn test_wrapped_and_bare_forms_agree() {
        let tensor = json!({"shape": [1], "data": [0.5]});
        let bare = parse_checkpoint(json!({"convlstm.conv_out.bias": tensor.clone()})).unwrap();
        let wrapped = parse_checkpoint(json!({"state_dict": {"convlstm.conv_out.bias": tensor}})).unwrap();
        assert_eq!(bare, wrapped);
    }

    #[test]
    fn test_missing_and_unexpected_reported() {
        let mut model = ConvLstm::zeroed(tiny()).unwrap();
        let dict = parse_checkpoint(json!({
            "convlstm.conv_out.bias": {"shape": [1], "data": [2.0]},
            "decoder.weight": {"shape": [1], "data": [1.0]},
        }))
        .unwrap();
        let report = model.load_state_dict(&dict).unwrap();
        assert_eq!(report.loaded, vec!["convlstm.conv_out.bias"]);
        assert_eq!(report.missing.len(), 3);
        assert_eq!(report.unexpected, vec!["decoder.weight"]);
        assert_eq!(model.head().bias().unwrap()[0], 2.0);
    }

    #[test]
    fn test_shape_mismatch_leaves_model_untouched() {
        let mut model = ConvLstm::zeroed(tiny()).unwrap();
        let dict = parse_checkpoint(json!({
            "convlstm.conv_out.bias": {"shape": [1], "data": [3.0]},
            "convlstm.conv_out.weight": {"shape": [2], "data": [1.0, 1.0]},
        }))
        .unwrap();
        assert!(matches!(model.load_state_dict(&dict), Err(Error::ShapeMismatch { .. })));
        assert_eq!(model.head().bias().unwrap()[0], 0.0);
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(parse_checkpoint(json!([1, 2])), Err(Error::CheckpointFormat(_))));
        assert!(matches!(
            parse_checkpoint(json!({"state_dict": 3})),
            Err(Error::CheckpointFormat(_))
        ));
        assert!(matches!(
            parse_checkpoint(json!({"w": {"shape": [2, 2], "data": [1.0]}})),
            Err(Error::CheckpointFormat(_))
        ));
    }

    #[test]
    fn test_save_then_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let model = ConvLstm::new(tiny(), 17).unwrap();
        save_checkpoint(&model, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\"state_dict\""));

        let dict = load_checkpoint_file(&path).unwrap();
        assert_eq!(dict, model.state_dict());
    }
}
