use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sceneforged_extractor::DEFAULT_SNIFF_WINDOW;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// Parameter name to value, applied to every session.
    #[serde(default)]
    pub parameters: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Bytes offered to the sniffers during auto-detection
    #[serde(default = "default_sniff_window")]
    pub sniff_window: usize,

    /// Buffer size of the file reader
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

fn default_sniff_window() -> usize {
    DEFAULT_SNIFF_WINDOW
}

fn default_read_chunk() -> usize {
    64 * 1024
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sniff_window: default_sniff_window(),
            read_chunk: default_read_chunk(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Stop `dump` after this many samples unless `--limit` says otherwise
    #[serde(default)]
    pub max_samples: Option<usize>,

    /// Print JSON reports by default
    #[serde(default)]
    pub json: bool,
}
