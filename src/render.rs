//! Frame callbacks a host surface drives, and the filter that answers them.

use anyhow::{Result, bail};

use crate::blur::compositor::RadialMask;
use crate::blur::pending::BlurController;
use crate::blur::pipeline::TwoPassBlurPipeline;
use crate::blur::selective::SelectiveBlurFilter;
use crate::host::{GraphicsHost, RenderTarget, TextureId};

/// Lifecycle of a rendering surface, invoked on the render thread.
pub trait FrameRenderer<H: GraphicsHost + ?Sized> {
    fn surface_created(&mut self, host: &mut H) -> Result<()>;
    fn surface_changed(&mut self, host: &mut H, width: u32, height: u32) -> Result<()>;
    fn do_frame(&mut self, host: &mut H) -> Result<()>;
    fn surface_destroyed(&mut self, host: &mut H);
}

#[derive(Debug)]
pub enum BlurFilter {
    Plain(TwoPassBlurPipeline),
    Selective(Box<SelectiveBlurFilter>),
}

impl BlurFilter {
    pub fn selective(pipeline: TwoPassBlurPipeline, mask: RadialMask) -> Self {
        BlurFilter::Selective(Box::new(SelectiveBlurFilter::new(pipeline, mask)))
    }

    pub fn pipeline(&self) -> &TwoPassBlurPipeline {
        match self {
            BlurFilter::Plain(pipeline) => pipeline,
            BlurFilter::Selective(filter) => filter.blur(),
        }
    }

    /// Handle for queueing parameter changes from other threads.
    pub fn controller(&self) -> BlurController {
        match self {
            BlurFilter::Plain(pipeline) => pipeline.controller(),
            BlurFilter::Selective(filter) => filter.controller(),
        }
    }

    pub fn init(&mut self, host: &mut dyn GraphicsHost) -> Result<()> {
        match self {
            BlurFilter::Plain(pipeline) => pipeline.init(host),
            BlurFilter::Selective(filter) => filter.init(host),
        }
    }

    pub fn on_output_size_changed(&mut self, host: &mut dyn GraphicsHost, width: u32, height: u32) -> Result<()> {
        match self {
            BlurFilter::Plain(pipeline) => pipeline.on_output_size_changed(host, width, height),
            BlurFilter::Selective(filter) => filter.on_output_size_changed(host, width, height),
        }
    }

    pub fn render(&mut self, host: &mut dyn GraphicsHost, input: TextureId, target: RenderTarget) -> Result<()> {
        match self {
            BlurFilter::Plain(pipeline) => pipeline.render(host, input, target),
            BlurFilter::Selective(filter) => filter.render(host, input, target),
        }
    }

    pub fn destroy(&mut self, host: &mut dyn GraphicsHost) {
        match self {
            BlurFilter::Plain(pipeline) => pipeline.destroy(host),
            BlurFilter::Selective(filter) => filter.destroy(host),
        }
    }
}

/// Draws one source texture through a [`BlurFilter`] onto the surface.
#[derive(Debug)]
pub struct FilterRenderer {
    filter: BlurFilter,
    source: Option<TextureId>,
    frames: u64,
}

impl FilterRenderer {
    pub fn new(filter: BlurFilter) -> Self {
        Self {
            filter,
            source: None,
            frames: 0,
        }
    }

    pub fn filter(&self) -> &BlurFilter {
        &self.filter
    }

    pub fn controller(&self) -> BlurController {
        self.filter.controller()
    }

    /// Texture drawn by the following frames, e.g. the latest video frame.
    pub fn set_source(&mut self, texture: TextureId) {
        self.source = Some(texture);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }
}

impl<H: GraphicsHost> FrameRenderer<H> for FilterRenderer {
    fn surface_created(&mut self, host: &mut H) -> Result<()> {
        self.filter.init(host)
    }

    fn surface_changed(&mut self, host: &mut H, width: u32, height: u32) -> Result<()> {
        self.filter.on_output_size_changed(host, width, height)
    }

    fn do_frame(&mut self, host: &mut H) -> Result<()> {
        let Some(source) = self.source else {
            bail!("no source texture set before drawing a frame");
        };
        self.filter.render(host, source, RenderTarget::Surface)?;
        self.frames += 1;
        Ok(())
    }

    fn surface_destroyed(&mut self, host: &mut H) {
        self.filter.destroy(host);
        tracing::info!(frames = self.frames, "surface destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blur::shaders::BlurVariant;
    use crate::host::SoftwareHost;

    #[test]
    fn frame_without_source_is_an_error() {
        let mut host = SoftwareHost::with_surface(4, 4);
        let mut renderer = FilterRenderer::new(BlurFilter::Plain(TwoPassBlurPipeline::new(BlurVariant::Fixed9)));
        renderer.surface_created(&mut host).unwrap();
        renderer.surface_changed(&mut host, 4, 4).unwrap();
        assert!(renderer.do_frame(&mut host).is_err());
        assert_eq!(renderer.frames_rendered(), 0);
    }

    #[test]
    fn lifecycle_draws_and_releases() {
        let mut host = SoftwareHost::with_surface(4, 4);
        let mut renderer = FilterRenderer::new(BlurFilter::selective(
            TwoPassBlurPipeline::new(BlurVariant::Dynamic15),
            RadialMask::default(),
        ));
        renderer.surface_created(&mut host).unwrap();
        renderer.surface_changed(&mut host, 4, 4).unwrap();
        let source = host.create_texture(4, 4);
        renderer.set_source(source);
        renderer.do_frame(&mut host).unwrap();
        renderer.do_frame(&mut host).unwrap();
        assert_eq!(renderer.frames_rendered(), 2);
        // Two blur passes plus the mask, per frame.
        assert_eq!(host.draw_call_count(), 6);

        renderer.surface_destroyed(&mut host);
        assert_eq!(host.live_programs(), 0);
        assert_eq!(host.live_framebuffers(), 0);
    }
}
