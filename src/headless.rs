//! One-shot blurring of images without a window or GPU.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::blur::weights::DiagnosticsHook;
use crate::config::BlurConfig;
use crate::host::{RenderTarget, SoftwareHost};

pub fn blur_image(image: &DynamicImage, config: &BlurConfig) -> Result<RgbaImage> {
    blur_image_with_diagnostics(image, config, None)
}

/// Like [`blur_image`], reporting every weight solve to `diagnostics`.
pub fn blur_image_with_diagnostics(
    image: &DynamicImage,
    config: &BlurConfig,
    diagnostics: Option<DiagnosticsHook>,
) -> Result<RgbaImage> {
    let source = image.to_rgba8();
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        bail!("cannot blur an empty {width}x{height} image");
    }

    let mut host = SoftwareHost::with_surface(width, height);
    let input = host.upload_texture(&source);
    let mut filter = config.build_filter(diagnostics);

    filter.init(&mut host)?;
    filter.on_output_size_changed(&mut host, width, height)?;
    filter.render(&mut host, input, RenderTarget::Surface)?;
    let output = host
        .read_target_rgba8(RenderTarget::Surface)
        .context("surface was not rendered")?;
    filter.destroy(&mut host);

    tracing::info!(width, height, variant = %config.variant, "blurred image");
    Ok(output)
}

pub fn blur_file_to_png(input: impl AsRef<Path>, output: impl AsRef<Path>, config: &BlurConfig) -> Result<()> {
    blur_file_to_png_with_diagnostics(input, output, config, None)
}

pub fn blur_file_to_png_with_diagnostics(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &BlurConfig,
    diagnostics: Option<DiagnosticsHook>,
) -> Result<()> {
    let (input, output) = (input.as_ref(), output.as_ref());
    let image = image::open(input).with_context(|| format!("failed to read image {}", input.display()))?;
    let blurred = blur_image_with_diagnostics(&image, config, diagnostics)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }
    blurred
        .save_with_format(output, ImageFormat::Png)
        .map_err(|e| anyhow!("failed to save png {}: {e}", output.display()))
}
