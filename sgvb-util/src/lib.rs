pub mod sgvb;

pub use candle_core;
pub use candle_nn;
