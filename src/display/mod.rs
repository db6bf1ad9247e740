pub mod snapshot;
pub mod terminal;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Live scrolling waveform in the terminal
    #[default]
    Terminal,
    /// Render a few seconds of signal to a PNG and exit
    Snapshot,
}
