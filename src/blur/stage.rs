use anyhow::Result;

use crate::blur::shaders::{
    ASPECT_RATIO, EXCLUDE_BLUR_SIZE, EXCLUDE_CIRCLE_POINT, EXCLUDE_CIRCLE_RADIUS, OPTIMIZE_SAMPLE_SIZE, SAMPLE_SIZE,
    STANDARD_GAUSSIAN_WEIGHTS, STEP_OFFSET, ShaderProgram, TEXEL_HEIGHT_OFFSET, TEXEL_WIDTH_OFFSET, WEIGHT,
};
use crate::host::{CompileError, FramebufferId, GraphicsHost, ProgramId, TextureId, UniformLocation, UniformValue};

/// What a uniform means to the pipeline, independent of its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformSemantic {
    TexelWidthOffset,
    TexelHeightOffset,
    SampleSize,
    OptimizeSampleSize,
    Weight,
    StepOffset,
    StandardGaussianWeights,
    ExcludeCirclePoint,
    ExcludeCircleRadius,
    ExcludeBlurSize,
    AspectRatio,
}

impl UniformSemantic {
    pub fn uniform_name(&self) -> &'static str {
        match self {
            UniformSemantic::TexelWidthOffset => TEXEL_WIDTH_OFFSET,
            UniformSemantic::TexelHeightOffset => TEXEL_HEIGHT_OFFSET,
            UniformSemantic::SampleSize => SAMPLE_SIZE,
            UniformSemantic::OptimizeSampleSize => OPTIMIZE_SAMPLE_SIZE,
            UniformSemantic::Weight => WEIGHT,
            UniformSemantic::StepOffset => STEP_OFFSET,
            UniformSemantic::StandardGaussianWeights => STANDARD_GAUSSIAN_WEIGHTS,
            UniformSemantic::ExcludeCirclePoint => EXCLUDE_CIRCLE_POINT,
            UniformSemantic::ExcludeCircleRadius => EXCLUDE_CIRCLE_RADIUS,
            UniformSemantic::ExcludeBlurSize => EXCLUDE_BLUR_SIZE,
            UniformSemantic::AspectRatio => ASPECT_RATIO,
        }
    }

    pub fn from_uniform_name(name: &str) -> Option<Self> {
        Some(match name {
            TEXEL_WIDTH_OFFSET => UniformSemantic::TexelWidthOffset,
            TEXEL_HEIGHT_OFFSET => UniformSemantic::TexelHeightOffset,
            SAMPLE_SIZE => UniformSemantic::SampleSize,
            OPTIMIZE_SAMPLE_SIZE => UniformSemantic::OptimizeSampleSize,
            WEIGHT => UniformSemantic::Weight,
            STEP_OFFSET => UniformSemantic::StepOffset,
            STANDARD_GAUSSIAN_WEIGHTS => UniformSemantic::StandardGaussianWeights,
            EXCLUDE_CIRCLE_POINT => UniformSemantic::ExcludeCirclePoint,
            EXCLUDE_CIRCLE_RADIUS => UniformSemantic::ExcludeCircleRadius,
            EXCLUDE_BLUR_SIZE => UniformSemantic::ExcludeBlurSize,
            ASPECT_RATIO => UniformSemantic::AspectRatio,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformBinding {
    pub semantic: UniformSemantic,
    /// `None` when the compiled program has no such uniform.
    pub location: Option<UniformLocation>,
}

impl UniformBinding {
    pub fn name(&self) -> &'static str {
        self.semantic.uniform_name()
    }
}

/// One compiled program plus the framebuffer it renders into, if it owns one.
#[derive(Debug)]
pub struct PipelineStage {
    source: ShaderProgram,
    program: ProgramId,
    bindings: Vec<UniformBinding>,
    framebuffer: Option<(FramebufferId, [u32; 2])>,
}

impl PipelineStage {
    pub fn create(
        host: &mut dyn GraphicsHost,
        source: ShaderProgram,
        semantics: &[UniformSemantic],
    ) -> Result<Self, CompileError> {
        let program = host.compile(&source)?;
        let mut stage = Self {
            source,
            program,
            bindings: semantics
                .iter()
                .map(|&semantic| UniformBinding {
                    semantic,
                    location: None,
                })
                .collect(),
            framebuffer: None,
        };
        stage.resolve_locations(host);
        Ok(stage)
    }

    /// Compile the source again, replacing the current program.
    pub fn recompile(&mut self, host: &mut dyn GraphicsHost) -> Result<(), CompileError> {
        let program = host.compile(&self.source)?;
        host.delete_program(self.program);
        self.program = program;
        self.resolve_locations(host);
        Ok(())
    }

    fn resolve_locations(&mut self, host: &dyn GraphicsHost) {
        for binding in &mut self.bindings {
            binding.location = host.uniform_location(self.program, binding.name());
            if binding.location.is_none() {
                tracing::debug!(
                    program = %self.source.label,
                    uniform = binding.name(),
                    "uniform not active; uploads will be skipped"
                );
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.source.label
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn bindings(&self) -> &[UniformBinding] {
        &self.bindings
    }

    pub fn location(&self, semantic: UniformSemantic) -> Option<UniformLocation> {
        self.bindings
            .iter()
            .find(|b| b.semantic == semantic)
            .and_then(|b| b.location)
    }

    /// Upload `value` if the program has the uniform. Returns whether it did.
    pub fn upload(&self, host: &mut dyn GraphicsHost, semantic: UniformSemantic, value: UniformValue) -> bool {
        match self.location(semantic) {
            Some(location) => {
                host.upload_uniform(self.program, location, &value);
                true
            }
            None => false,
        }
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer.map(|(id, _)| id)
    }

    pub fn framebuffer_texture(&self, host: &dyn GraphicsHost) -> Option<TextureId> {
        self.framebuffer().and_then(|fb| host.framebuffer_texture(fb))
    }

    /// (Re)create the owned framebuffer at `width` x `height`.
    pub fn resize_framebuffer(&mut self, host: &mut dyn GraphicsHost, width: u32, height: u32) -> Result<FramebufferId> {
        if let Some((id, size)) = self.framebuffer {
            if size == [width, height] {
                return Ok(id);
            }
            host.delete_framebuffer(id);
            self.framebuffer = None;
        }
        let id = host.create_framebuffer(width, height)?;
        self.framebuffer = Some((id, [width, height]));
        Ok(id)
    }

    pub fn destroy(self, host: &mut dyn GraphicsHost) {
        if let Some((id, _)) = self.framebuffer {
            host.delete_framebuffer(id);
        }
        host.delete_program(self.program);
    }
}
