//! Radial (tilt-shift) blend of a sharp image against its blurred copy.
//!
//! Inside `radius - transition_width` of the centre the sharp pixel is kept,
//! outside `radius` the blurred one, with a smoothstep ramp in between.

use anyhow::{Context, Result, bail};
use image::Rgba32FImage;
use serde::{Deserialize, Serialize};

use crate::blur::shaders::radial_mask_program;
use crate::blur::stage::{PipelineStage, UniformSemantic};
use crate::host::{GraphicsHost, RenderTarget, TextureId, UniformValue};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadialMask {
    /// Normalised texture coordinates.
    pub center: [f32; 2],
    pub radius: f32,
    pub transition_width: f32,
    /// Output `height / width`.
    pub aspect_ratio: f32,
}

impl Default for RadialMask {
    fn default() -> Self {
        Self {
            center: [0.5, 0.5],
            radius: 0.34,
            transition_width: 0.1,
            aspect_ratio: 1.0,
        }
    }
}

impl RadialMask {
    /// Stretch `y` about the middle so that distances are isotropic on screen.
    pub fn aspect_corrected(&self, uv: [f32; 2]) -> [f32; 2] {
        [uv[0], uv[1] * self.aspect_ratio + 0.5 - 0.5 * self.aspect_ratio]
    }

    pub fn distance(&self, uv: [f32; 2]) -> f32 {
        let [x, y] = self.aspect_corrected(uv);
        let dx = x - self.center[0];
        let dy = y - self.center[1];
        (dx * dx + dy * dy).sqrt()
    }

    /// 0 keeps the sharp pixel, 1 takes the blurred one.
    pub fn mix_factor(&self, uv: [f32; 2]) -> f32 {
        smoothstep(self.radius - self.transition_width, self.radius, self.distance(uv))
    }
}

/// Cubic Hermite ramp from 0 at `edge0` to 1 at `edge1`. A zero or negative
/// width ramp is a hard step at `edge1`.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x >= edge1 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub fn radial_mix_factor(mask: &RadialMask, uv: [f32; 2]) -> f32 {
    mask.mix_factor(uv)
}

pub fn mix_rgba(sharp: [f32; 4], blurred: [f32; 4], t: f32) -> [f32; 4] {
    if t <= 0.0 {
        return sharp;
    }
    if t >= 1.0 {
        return blurred;
    }
    std::array::from_fn(|i| sharp[i] * (1.0 - t) + blurred[i] * t)
}

/// CPU version of the mask program over two same-sized images.
pub fn composite_images(sharp: &Rgba32FImage, blurred: &Rgba32FImage, mask: &RadialMask) -> Result<Rgba32FImage> {
    if sharp.dimensions() != blurred.dimensions() {
        bail!(
            "sharp image is {:?} but blurred image is {:?}",
            sharp.dimensions(),
            blurred.dimensions()
        );
    }
    let (width, height) = sharp.dimensions();
    Ok(Rgba32FImage::from_fn(width, height, |x, y| {
        let uv = [(x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32];
        let t = mask.mix_factor(uv);
        image::Rgba(mix_rgba(sharp.get_pixel(x, y).0, blurred.get_pixel(x, y).0, t))
    }))
}

/// The mask program on a [`GraphicsHost`].
#[derive(Debug)]
pub struct RadialMaskCompositor {
    mask: RadialMask,
    stage: Option<PipelineStage>,
}

impl RadialMaskCompositor {
    pub fn new(mask: RadialMask) -> Self {
        Self { mask, stage: None }
    }

    pub fn mask(&self) -> &RadialMask {
        &self.mask
    }

    pub fn is_initialized(&self) -> bool {
        self.stage.is_some()
    }

    pub fn init(&mut self, host: &mut dyn GraphicsHost) -> Result<()> {
        if self.stage.is_some() {
            return Ok(());
        }
        let stage = PipelineStage::create(
            host,
            radial_mask_program(),
            &[
                UniformSemantic::ExcludeCirclePoint,
                UniformSemantic::ExcludeCircleRadius,
                UniformSemantic::ExcludeBlurSize,
                UniformSemantic::AspectRatio,
            ],
        )
        .context("failed to build radial mask program")?;
        self.stage = Some(stage);
        self.upload_all(host);
        Ok(())
    }

    pub fn set_center(&mut self, host: &mut dyn GraphicsHost, center: [f32; 2]) {
        self.mask.center = center;
        self.upload(host, UniformSemantic::ExcludeCirclePoint, UniformValue::Vec2(center));
    }

    pub fn set_radius(&mut self, host: &mut dyn GraphicsHost, radius: f32) {
        self.mask.radius = radius;
        self.upload(host, UniformSemantic::ExcludeCircleRadius, UniformValue::Float(radius));
    }

    pub fn set_transition_width(&mut self, host: &mut dyn GraphicsHost, width: f32) {
        self.mask.transition_width = width;
        self.upload(host, UniformSemantic::ExcludeBlurSize, UniformValue::Float(width));
    }

    pub fn set_aspect_ratio(&mut self, host: &mut dyn GraphicsHost, aspect_ratio: f32) {
        self.mask.aspect_ratio = aspect_ratio;
        self.upload(host, UniformSemantic::AspectRatio, UniformValue::Float(aspect_ratio));
    }

    /// Blend `sharp` and `blurred` into `target`.
    pub fn composite(
        &self,
        host: &mut dyn GraphicsHost,
        sharp: TextureId,
        blurred: TextureId,
        target: RenderTarget,
    ) -> Result<()> {
        let Some(stage) = self.stage.as_ref() else {
            bail!("radial mask compositor is not initialised");
        };
        host.draw(stage.program(), &[sharp, blurred], target)
            .context("radial mask pass failed")
    }

    pub fn destroy(&mut self, host: &mut dyn GraphicsHost) {
        if let Some(stage) = self.stage.take() {
            stage.destroy(host);
        }
    }

    fn upload_all(&self, host: &mut dyn GraphicsHost) {
        self.upload(host, UniformSemantic::ExcludeCirclePoint, UniformValue::Vec2(self.mask.center));
        self.upload(host, UniformSemantic::ExcludeCircleRadius, UniformValue::Float(self.mask.radius));
        self.upload(host, UniformSemantic::ExcludeBlurSize, UniformValue::Float(self.mask.transition_width));
        self.upload(host, UniformSemantic::AspectRatio, UniformValue::Float(self.mask.aspect_ratio));
    }

    fn upload(&self, host: &mut dyn GraphicsHost, semantic: UniformSemantic, value: UniformValue) {
        if let Some(stage) = self.stage.as_ref() {
            stage.upload(host, semantic, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothstep_endpoints() {
        assert_eq!(smoothstep(0.2, 0.4, 0.1), 0.0);
        assert_eq!(smoothstep(0.2, 0.4, 0.2), 0.0);
        assert_eq!(smoothstep(0.2, 0.4, 0.4), 1.0);
        assert_eq!(smoothstep(0.2, 0.4, 0.9), 1.0);
        assert!((smoothstep(0.2, 0.4, 0.3) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_width_transition_is_a_hard_step() {
        assert_eq!(smoothstep(0.3, 0.3, 0.29), 0.0);
        assert_eq!(smoothstep(0.3, 0.3, 0.3), 1.0);
        assert_eq!(smoothstep(0.5, 0.3, 0.4), 1.0);
    }

    #[test]
    fn aspect_correction_keeps_the_middle_fixed() {
        let mask = RadialMask {
            aspect_ratio: 2.0,
            ..RadialMask::default()
        };
        assert_eq!(mask.aspect_corrected([0.3, 0.5]), [0.3, 0.5]);
        assert_eq!(mask.aspect_corrected([0.3, 0.75]), [0.3, 1.0]);
    }

    #[test]
    fn mix_is_exact_at_the_ends() {
        let sharp = [0.1, 0.2, 0.3, 0.4];
        let blurred = [0.9, 0.8, 0.7, 0.6];
        assert_eq!(mix_rgba(sharp, blurred, 0.0), sharp);
        assert_eq!(mix_rgba(sharp, blurred, 1.0), blurred);
        let mid = mix_rgba(sharp, blurred, 0.5);
        assert!((mid[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn composite_images_rejects_mismatched_sizes() {
        let a = Rgba32FImage::new(4, 4);
        let b = Rgba32FImage::new(4, 3);
        assert!(composite_images(&a, &b, &RadialMask::default()).is_err());
    }

    #[test]
    fn composite_images_keeps_the_centre_sharp() {
        let sharp = Rgba32FImage::from_pixel(9, 9, image::Rgba([1.0, 0.0, 0.0, 1.0]));
        let blurred = Rgba32FImage::from_pixel(9, 9, image::Rgba([0.0, 0.0, 1.0, 1.0]));
        let mask = RadialMask {
            radius: 0.3,
            transition_width: 0.1,
            ..RadialMask::default()
        };
        let out = composite_images(&sharp, &blurred, &mask).unwrap();
        assert_eq!(out.get_pixel(4, 4).0, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(out.get_pixel(0, 0).0, [0.0, 0.0, 1.0, 1.0]);
    }
}
