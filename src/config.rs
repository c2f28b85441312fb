//! JSON configuration for building a blur filter.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::blur::compositor::RadialMask;
use crate::blur::pipeline::TwoPassBlurPipeline;
use crate::blur::shaders::BlurVariant;
use crate::blur::weights::DiagnosticsHook;
use crate::render::BlurFilter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlurConfig {
    #[serde(default)]
    pub variant: BlurVariant,
    /// Texel spacing for `fixed9`, Gaussian radius otherwise.
    #[serde(default)]
    pub blur_size: Option<f32>,
    #[serde(default = "default_texel_spacing")]
    pub texel_spacing: f32,
    #[serde(default)]
    pub sigma: Option<f32>,
    #[serde(default)]
    pub selective: Option<SelectiveConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectiveConfig {
    #[serde(default = "default_center")]
    pub center: [f32; 2],
    #[serde(default = "default_radius")]
    pub radius: f32,
    #[serde(default = "default_transition_width")]
    pub transition_width: f32,
}

fn default_texel_spacing() -> f32 {
    1.0
}

fn default_center() -> [f32; 2] {
    [0.5, 0.5]
}

fn default_radius() -> f32 {
    0.34
}

fn default_transition_width() -> f32 {
    0.1
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            variant: BlurVariant::default(),
            blur_size: None,
            texel_spacing: default_texel_spacing(),
            sigma: None,
            selective: None,
        }
    }
}

impl Default for SelectiveConfig {
    fn default() -> Self {
        Self {
            center: default_center(),
            radius: default_radius(),
            transition_width: default_transition_width(),
        }
    }
}

impl SelectiveConfig {
    pub fn mask(&self) -> RadialMask {
        RadialMask {
            center: self.center,
            radius: self.radius,
            transition_width: self.transition_width,
            ..RadialMask::default()
        }
    }
}

impl BlurConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let mut config: BlurConfig = serde_json::from_str(text).context("failed to parse blur config json")?;
        config.normalize();
        Ok(config)
    }

    /// The blur size in effect, falling back to the variant's default.
    pub fn effective_blur_size(&self) -> f32 {
        self.blur_size.unwrap_or_else(|| self.variant.default_blur_size())
    }

    /// Replace negative or non-finite values with their defaults.
    pub fn normalize(&mut self) {
        if self.blur_size.is_some_and(|v| !v.is_finite() || v < 0.0) {
            self.blur_size = None;
        }
        if !self.texel_spacing.is_finite() || self.texel_spacing < 0.0 {
            self.texel_spacing = default_texel_spacing();
        }
        if self.sigma.is_some_and(|v| !v.is_finite() || v <= 0.0) {
            self.sigma = None;
        }
        if let Some(selective) = self.selective.as_mut() {
            if !selective.center.iter().all(|c| c.is_finite()) {
                selective.center = default_center();
            }
            if !selective.radius.is_finite() || selective.radius < 0.0 {
                selective.radius = default_radius();
            }
            if !selective.transition_width.is_finite() || selective.transition_width < 0.0 {
                selective.transition_width = default_transition_width();
            }
        }
    }

    pub fn build_pipeline(&self) -> TwoPassBlurPipeline {
        let pipeline = TwoPassBlurPipeline::new(self.variant)
            .with_texel_offset_ratios(self.texel_spacing, self.texel_spacing)
            .with_sigma(self.sigma);
        pipeline.with_blur_size(self.effective_blur_size())
    }

    pub fn build_filter(&self, diagnostics: Option<DiagnosticsHook>) -> BlurFilter {
        let mut pipeline = self.build_pipeline();
        if let Some(hook) = diagnostics {
            pipeline = pipeline.with_diagnostics(hook);
        }
        match &self.selective {
            Some(selective) => BlurFilter::selective(pipeline, selective.mask()),
            None => BlurFilter::Plain(pipeline),
        }
    }
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<BlurConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read blur config at {}", path.display()))?;
    BlurConfig::from_json_str(&text).with_context(|| format!("invalid blur config in {}", path.display()))
}
