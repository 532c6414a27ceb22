//! # ConvLSTM Predictor
//!
//! Everything between a `[B, T, C, H, W]` batch and a predicted frame.
//!
//! | Module | Contents |
//! |--------|----------|
//! | `conv` | Same-padded 2-D convolution (im2col + GEMM) |
//! | `cell` | One ConvLSTM layer and its `(h, c)` state |
//! | `convlstm` | Stacked layers, output head, activation |
//! | `checkpoint` | Named-tensor JSON checkpoints, non-strict loading |
//! | `weights` | `SharedModel`: RwLock-guarded weights |
//! | `backend` | Sequential / rayon batch scheduling |
//! | `loss` | Next-frame MSE evaluation |
//! | `train` | Backpropagation through time, Adam, `Trainer` |
//!
//! Gate layout of the fused convolution is `i, f, g, o` along the output
//! channel axis:
//!
//! ```text
//! c' = σ(f)·c + σ(i)·tanh(g)
//! h' = σ(o)·tanh(c')
//! ```

pub mod conv;
pub mod cell;
pub mod convlstm;
pub mod checkpoint;
pub mod weights;
pub mod backend;
pub mod loss;
pub mod train;

pub use conv::{Conv2d, ConvGrads};
pub use cell::{sigmoid, CellState, ConvLstmCell};
pub use convlstm::{Activation, ConvLstm, ConvLstmConfig};
pub use checkpoint::{
    load_checkpoint_file, parse_checkpoint, save_checkpoint, LoadReport, StateDict, TensorRecord,
};
pub use weights::SharedModel;
pub use backend::{BackendCapabilities, BackendKind, ExecutionBackend, RayonBackend, SequentialBackend};
pub use loss::{evaluate_next_frame, mse, EvalReport};
pub use train::{Adam, AdamConfig, Gradients, TrainConfig, TrainReport, Trainer};
