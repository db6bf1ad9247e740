use std::f64::consts::TAU;

use super::Waveshape;

/// Periodic test signal generator.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    shape: Waveshape,
    amplitude: f32,
    step: f64,
    phase: f64,
}

impl SignalGenerator {
    pub fn new(shape: Waveshape, frequency: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            shape,
            amplitude: amplitude.clamp(0.0, 1.0),
            step: frequency as f64 / sample_rate.max(1) as f64,
            phase: 0.0,
        }
    }

    fn sample(&self) -> f32 {
        let value = match self.shape {
            Waveshape::Sine => (self.phase * TAU).sin(),
            Waveshape::Saw => 2.0 * self.phase - 1.0,
            Waveshape::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        value as f32 * self.amplitude
    }

    /// Generate the next `len` samples, continuing the phase.
    pub fn next_block(&mut self, len: usize) -> Vec<f32> {
        let mut block = Vec::with_capacity(len);
        for _ in 0..len {
            block.push(self.sample());
            self.phase = (self.phase + self.step).fract();
        }
        block
    }
}
