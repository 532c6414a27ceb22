//! Adjacency as an Arrow `RecordBatch` (`u: Int64, v: Int64, w: Float32`).

use std::sync::Arc;

use arrow_array::{ArrayRef, Float32Array, Int64Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};

use crate::graph::SparseAdjacency;
use crate::Result;

pub fn adjacency_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("u", DataType::Int64, false),
        Field::new("v", DataType::Int64, false),
        Field::new("w", DataType::Float32, false),
    ]))
}

pub fn adjacency_to_record_batch(adjacency: &SparseAdjacency) -> Result<RecordBatch> {
    let u: ArrayRef = Arc::new(Int64Array::from_iter_values(adjacency.rows().iter().map(|&r| r as i64)));
    let v: ArrayRef = Arc::new(Int64Array::from_iter_values(adjacency.cols().iter().map(|&c| c as i64)));
    let w: ArrayRef = Arc::new(Float32Array::from(adjacency.weights().to_vec()));
    Ok(RecordBatch::try_new(adjacency_schema(), vec![u, v, w])?)
}
