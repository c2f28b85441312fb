use anyhow::{Context, Result, bail};

use crate::blur::compositor::{RadialMask, RadialMaskCompositor};
use crate::blur::pending::{BlurController, ParameterUpdate, PendingUpdates};
use crate::blur::pipeline::TwoPassBlurPipeline;
use crate::host::{FramebufferId, GraphicsHost, RenderTarget, TextureId};

/// Blur everything except a circle around a point (tilt-shift).
///
/// The blur renders into an owned framebuffer; the radial mask then mixes it
/// with the untouched input into the caller's target.
#[derive(Debug)]
pub struct SelectiveBlurFilter {
    blur: TwoPassBlurPipeline,
    compositor: RadialMaskCompositor,
    pending: PendingUpdates,
    blurred: Option<(FramebufferId, [u32; 2])>,
}

impl SelectiveBlurFilter {
    pub fn new(blur: TwoPassBlurPipeline, mask: RadialMask) -> Self {
        Self {
            blur,
            compositor: RadialMaskCompositor::new(mask),
            pending: PendingUpdates::new(),
            blurred: None,
        }
    }

    pub fn blur(&self) -> &TwoPassBlurPipeline {
        &self.blur
    }

    pub fn compositor(&self) -> &RadialMaskCompositor {
        &self.compositor
    }

    pub fn mask(&self) -> &RadialMask {
        self.compositor.mask()
    }

    /// Handle for changing blur size, radius, centre and transition width
    /// from any thread.
    pub fn controller(&self) -> BlurController {
        self.pending.controller()
    }

    pub fn set_blur_size(&self, value: f32) {
        self.pending.controller().set_blur_size(value);
    }

    pub fn set_radius(&self, radius: f32) {
        self.pending.controller().set_radius(radius);
    }

    pub fn set_center(&self, x: f32, y: f32) {
        self.pending.controller().set_center(x, y);
    }

    pub fn set_transition_width(&self, width: f32) {
        self.pending.controller().set_transition_width(width);
    }

    pub fn init(&mut self, host: &mut dyn GraphicsHost) -> Result<()> {
        self.blur.init(host)?;
        if let Err(e) = self.compositor.init(host) {
            self.blur.destroy(host);
            return Err(e);
        }
        if let Some([w, h]) = self.blur.output_size() {
            self.bind_size(host, w, h)?;
        }
        Ok(())
    }

    pub fn on_output_size_changed(&mut self, host: &mut dyn GraphicsHost, width: u32, height: u32) -> Result<()> {
        self.blur.on_output_size_changed(host, width, height)?;
        if !self.compositor.is_initialized() {
            return Ok(());
        }
        self.bind_size(host, width, height)
    }

    fn bind_size(&mut self, host: &mut dyn GraphicsHost, width: u32, height: u32) -> Result<()> {
        match self.blurred {
            Some((_, size)) if size == [width, height] => {}
            previous => {
                if let Some((id, _)) = previous {
                    host.delete_framebuffer(id);
                }
                self.blurred = None;
                let id = host
                    .create_framebuffer(width, height)
                    .context("failed to allocate blurred framebuffer")?;
                self.blurred = Some((id, [width, height]));
            }
        }
        self.compositor.set_aspect_ratio(host, self.blur.aspect_ratio());
        Ok(())
    }

    pub fn render(&mut self, host: &mut dyn GraphicsHost, input: TextureId, target: RenderTarget) -> Result<()> {
        let Some((blurred_fb, _)) = self.blurred else {
            bail!("selective blur rendered before an output size was bound");
        };
        for update in self.pending.drain() {
            self.apply(host, update);
        }

        self.blur
            .render(host, input, RenderTarget::Framebuffer(blurred_fb))?;
        let blurred = host
            .framebuffer_texture(blurred_fb)
            .context("blurred framebuffer has no texture")?;
        self.compositor.composite(host, input, blurred, target)
    }

    fn apply(&mut self, host: &mut dyn GraphicsHost, update: ParameterUpdate) {
        match update {
            ParameterUpdate::BlurSize(value) => self.blur.apply_blur_size(host, value),
            ParameterUpdate::Radius(radius) => self.compositor.set_radius(host, radius),
            ParameterUpdate::Center(center) => self.compositor.set_center(host, center),
            ParameterUpdate::TransitionWidth(width) => self.compositor.set_transition_width(host, width),
        }
    }

    pub fn destroy(&mut self, host: &mut dyn GraphicsHost) {
        if let Some((id, _)) = self.blurred.take() {
            host.delete_framebuffer(id);
        }
        self.compositor.destroy(host);
        self.blur.destroy(host);
    }
}
