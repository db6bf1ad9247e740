//! Synthetic sample sources feeding a waveform driver.

mod generator;

pub use generator::SignalGenerator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::driver::WaveformHandle;
use crate::renderer::Renderer;

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Waveshape {
    #[default]
    Sine,
    Saw,
    Square,
}

/// A running source task. Stops when dropped.
pub struct SignalSource {
    task: JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
}

impl Drop for SignalSource {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.task.abort();
    }
}

impl SignalSource {
    /// Push one block of generated samples every `block_size / sample_rate`
    /// seconds, in real time.
    pub fn spawn<R>(config: &SourceConfig, handle: WaveformHandle<R>) -> Self
    where
        R: Renderer + Send + 'static,
    {
        let mut generator = SignalGenerator::new(
            config.shape,
            config.frequency,
            config.amplitude,
            config.sample_rate,
        );
        let block_size = config.block_size.max(1);
        let period = Duration::from_secs_f64(block_size as f64 / config.sample_rate.max(1) as f64);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop = stop_flag.clone();

        info!(
            "Generating {:?} at {} Hz, {} samples every {:?}",
            config.shape, config.frequency, block_size, period
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            while !stop.load(Ordering::Relaxed) {
                ticker.tick().await;
                if handle.push(generator.next_block(block_size)).await.is_err() {
                    debug!("Waveform driver closed, stopping signal source");
                    break;
                }
            }
        });

        Self { task, stop_flag }
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
