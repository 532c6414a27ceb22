//! Probability map: the per-cell forecast the graph is built from.

use ndarray::{Array2, ArrayView2, ArrayView5, Axis};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A `[H, W]` map of next-step activation probabilities, always in `[0, 1]`.
///
/// Deserialization rejects values outside `[0, 1]` instead of clamping them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawProbabilityMap")]
pub struct ProbabilityMap {
    values: Array2<f32>,
}

#[derive(Deserialize)]
struct RawProbabilityMap {
    values: Array2<f32>,
}

impl TryFrom<RawProbabilityMap> for ProbabilityMap {
    type Error = Error;

    fn try_from(raw: RawProbabilityMap) -> Result<Self> {
        if let Some(bad) = raw.values.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(Error::shape("probability value", "within [0, 1]", bad));
        }
        Ok(Self { values: raw.values })
    }
}

impl ProbabilityMap {
    /// Clamp arbitrary scores into a probability map. NaN becomes `0.0`.
    pub fn from_scores(scores: ArrayView2<'_, f32>) -> Self {
        let values = scores.mapv(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) });
        Self { values }
    }

    /// Build from row-major values.
    pub fn from_vec(height: usize, width: usize, values: Vec<f32>) -> Result<Self> {
        let len = values.len();
        let arr = Array2::from_shape_vec((height, width), values)
            .map_err(|_| Error::shape("probability map", height * width, len))?;
        Ok(Self::from_scores(arr.view()))
    }

    /// Select one `(batch, step, channel)` slot of a model output
    /// `[B, L, C, H, W]`.
    pub fn from_prediction(
        prediction: ArrayView5<'_, f32>,
        batch: usize,
        step: usize,
        channel: usize,
    ) -> Result<Self> {
        let (b, l, c, _, _) = prediction.dim();
        if batch >= b || step >= l || channel >= c {
            return Err(Error::shape(
                "prediction slot",
                format!("batch < {b}, step < {l}, channel < {c}"),
                (batch, step, channel),
            ));
        }
        let plane = prediction
            .index_axis(Axis(0), batch)
            .index_axis_move(Axis(0), step)
            .index_axis_move(Axis(0), channel);
        Ok(Self::from_scores(plane))
    }

    pub fn height(&self) -> usize { self.values.nrows() }
    pub fn width(&self) -> usize { self.values.ncols() }
    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Probability at row `y`, column `x`.
    pub fn get(&self, y: usize, x: usize) -> f32 {
        self.values[[y, x]]
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.values.view()
    }

    /// Row-major flattening; index `i` is node `i` of the pixel graph.
    pub fn to_flat(&self) -> Vec<f32> {
        self.values.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array5};

    #[test]
    fn test_scores_are_clamped() {
        let map = ProbabilityMap::from_scores(array![[-0.5, 0.25], [1.5, f32::NAN]].view());
        assert_eq!(map.get(0, 0), 0.0);
        assert_eq!(map.get(0, 1), 0.25);
        assert_eq!(map.get(1, 0), 1.0);
        assert_eq!(map.get(1, 1), 0.0);
    }

    #[test]
    fn test_from_prediction_selects_channel() {
        let mut pred = Array5::<f32>::zeros((1, 1, 3, 2, 2));
        pred[[0, 0, 2, 1, 0]] = 0.7;
        let map = ProbabilityMap::from_prediction(pred.view(), 0, 0, 2).unwrap();
        assert_eq!(map.get(1, 0), 0.7);
        assert!(ProbabilityMap::from_prediction(pred.view(), 0, 0, 3).is_err());
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(ProbabilityMap::from_vec(2, 2, vec![0.0; 3]).is_err());
        let map = ProbabilityMap::from_vec(1, 3, vec![0.1, 0.2, 0.3]).unwrap();
        assert_eq!(map.to_flat(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_deserialize_rejects_out_of_range() {
        let map = ProbabilityMap::from_vec(1, 2, vec![0.0, 1.0]).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(serde_json::from_str::<ProbabilityMap>(&json).unwrap(), map);

        let above = r#"{"values":{"v":1,"dim":[1,2],"data":[0.5,1.5]}}"#;
        let err = serde_json::from_str::<ProbabilityMap>(above).unwrap_err();
        assert!(err.to_string().contains("within [0, 1]"), "{err}");
        let below = r#"{"values":{"v":1,"dim":[1,1],"data":[-0.1]}}"#;
        assert!(serde_json::from_str::<ProbabilityMap>(below).is_err());
        let missing = r#"{"values":{"v":1,"dim":[1,1],"data":[null]}}"#;
        assert!(serde_json::from_str::<ProbabilityMap>(missing).is_err());
    }
}
