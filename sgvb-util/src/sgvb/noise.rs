use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Seeded source of standard normal noise for reparameterized sampling.
///
/// candle cannot seed its CPU generator, so every random draw that should
/// be reproducible goes through this `StdRng` and is copied onto the
/// target device as an f32 tensor.
pub struct NoiseSource {
    rng: StdRng,
    device: Device,
}

impl NoiseSource {
    /// Create a noise source from a fixed seed.
    pub fn new(seed: u64, device: &Device) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            device: device.clone(),
        }
    }

    /// Create a noise source seeded from the operating system.
    pub fn from_os_rng(device: &Device) -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            device: device.clone(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Underlying generator, for draws that do not end up in a tensor.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Draw a single N(0, 1) value.
    pub fn standard_normal(&mut self) -> f32 {
        self.rng.sample(StandardNormal)
    }

    /// Standard normal matrix of shape (rows, cols).
    pub fn randn(&mut self, rows: usize, cols: usize) -> Result<Tensor> {
        self.normal(0.0, 1.0, rows, cols)
    }

    /// N(mean, std²) matrix of shape (rows, cols).
    pub fn normal(&mut self, mean: f32, std: f32, rows: usize, cols: usize) -> Result<Tensor> {
        let data: Vec<f32> = (0..rows * cols)
            .map(|_| mean + std * self.standard_normal())
            .collect();
        Tensor::from_vec(data, (rows, cols), &self.device)
    }
}
