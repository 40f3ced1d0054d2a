pub mod cli;
pub mod experiment;
pub mod kalman;
pub mod model;
pub mod plot;
pub mod results;
pub mod variational;
