//! Serializable snapshot of the live delay parameters.

use serde::{Deserialize, Serialize};

use crate::TapParams;

fn unity() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayPreset {
    #[serde(default = "unity")]
    pub dry_amp: f32,
    #[serde(default = "unity")]
    pub output_amp: f32,
    /// Indexed by tap number; missing entries stay at zero
    #[serde(default)]
    pub feedforward: Vec<TapParams>,
    #[serde(default)]
    pub feedback: Vec<TapParams>,
}

impl Default for DelayPreset {
    fn default() -> Self {
        Self {
            dry_amp: 1.0,
            output_amp: 1.0,
            feedforward: Vec::new(),
            feedback: Vec::new(),
        }
    }
}
