//! Two-pass separable blur: horizontal pass into an intermediate
//! framebuffer, vertical pass from there into the caller's target.

use anyhow::{Context, Result, bail};

use crate::blur::pending::{BlurController, ParameterUpdate, PendingUpdates};
use crate::blur::shaders::{BlurSizeTarget, BlurVariant};
use crate::blur::stage::{PipelineStage, UniformSemantic};
use crate::blur::weights::{BlurParameters, DiagnosticsHook, OptimizedSampleSet, WeightSolver};
use crate::host::{GraphicsHost, ProgramId, RenderTarget, TextureId, UniformValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Uninitialized,
    /// Programs compiled and weights uploaded; no output size yet.
    Initialized,
    /// Intermediate framebuffer sized and texel offsets uploaded.
    SizeBound,
    /// At least one frame rendered.
    Rendering,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TexelOffsetRatios {
    pub horizontal: f32,
    pub vertical: f32,
}

impl TexelOffsetRatios {
    pub fn uniform(ratio: f32) -> Self {
        Self {
            horizontal: ratio,
            vertical: ratio,
        }
    }
}

struct Stages {
    horizontal: PipelineStage,
    vertical: PipelineStage,
}

pub struct TwoPassBlurPipeline {
    variant: BlurVariant,
    state: PipelineState,
    stages: Option<Stages>,
    params: BlurParameters,
    ratios: TexelOffsetRatios,
    output_size: Option<[u32; 2]>,
    solver: WeightSolver,
    kernel: Option<OptimizedSampleSet>,
    pending: PendingUpdates,
}

impl std::fmt::Debug for TwoPassBlurPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoPassBlurPipeline")
            .field("variant", &self.variant)
            .field("state", &self.state)
            .field("params", &self.params)
            .field("ratios", &self.ratios)
            .field("output_size", &self.output_size)
            .finish()
    }
}

impl TwoPassBlurPipeline {
    pub fn new(variant: BlurVariant) -> Self {
        let solver = variant.sample_capacity().map(WeightSolver::new).unwrap_or_default();
        let mut pipeline = Self {
            variant,
            state: PipelineState::Uninitialized,
            stages: None,
            params: BlurParameters::new(BlurVariant::Dynamic15.default_blur_size()),
            ratios: TexelOffsetRatios::uniform(1.0),
            output_size: None,
            solver,
            kernel: None,
            pending: PendingUpdates::new(),
        };
        pipeline.store_blur_size(variant.default_blur_size());
        pipeline
    }

    /// Initial blur size, interpreted like [`Self::set_blur_size`].
    pub fn with_blur_size(mut self, value: f32) -> Self {
        self.store_blur_size(value);
        self
    }

    pub fn with_sigma(mut self, sigma: Option<f32>) -> Self {
        self.params.sigma = None;
        if let Some(sigma) = sigma {
            self.params = self.params.with_sigma(sigma);
        }
        self
    }

    /// Override the texel offset ratios. For [`BlurSizeTarget::TexelSpacing`]
    /// variants a later blur size change replaces them again.
    pub fn with_texel_offset_ratios(mut self, horizontal: f32, vertical: f32) -> Self {
        self.ratios = TexelOffsetRatios { horizontal, vertical };
        self
    }

    pub fn with_diagnostics(mut self, hook: DiagnosticsHook) -> Self {
        self.solver.set_diagnostics(Some(hook));
        self
    }

    pub fn variant(&self) -> BlurVariant {
        self.variant
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn output_size(&self) -> Option<[u32; 2]> {
        self.output_size
    }

    /// `height / width` of the bound output, 1.0 before a size is known.
    pub fn aspect_ratio(&self) -> f32 {
        match self.output_size {
            Some([w, h]) => h as f32 / w as f32,
            None => 1.0,
        }
    }

    pub fn parameters(&self) -> BlurParameters {
        self.params
    }

    pub fn horizontal_texel_offset_ratio(&self) -> f32 {
        self.ratios.horizontal
    }

    pub fn vertical_texel_offset_ratio(&self) -> f32 {
        self.ratios.vertical
    }

    /// Weights currently uploaded; `None` for programs with built-in weights.
    pub fn kernel(&self) -> Option<&OptimizedSampleSet> {
        self.kernel.as_ref()
    }

    /// `(horizontal, vertical)` program handles once initialised.
    pub fn programs(&self) -> Option<(ProgramId, ProgramId)> {
        self.stages
            .as_ref()
            .map(|s| (s.horizontal.program(), s.vertical.program()))
    }

    pub fn controller(&self) -> BlurController {
        self.pending.controller()
    }

    /// Queue a blur size change; it takes effect at the next [`Self::render`].
    pub fn set_blur_size(&self, value: f32) {
        self.pending.controller().set_blur_size(value);
    }

    /// `(texelWidthOffset, texelHeightOffset)` of each pass for the bound size.
    ///
    /// Both passes divide by the output height.
    pub fn texel_offsets(&self) -> Option<([f32; 2], [f32; 2])> {
        let [_, height] = self.output_size?;
        let height = height as f32;
        Some((
            [self.ratios.horizontal / height, 0.0],
            [0.0, self.ratios.vertical / height],
        ))
    }

    pub fn init(&mut self, host: &mut dyn GraphicsHost) -> Result<()> {
        if self.stages.is_some() {
            return Ok(());
        }

        let pair = self.variant.program_pair();
        let semantics = self.semantics();
        let horizontal = PipelineStage::create(host, pair.horizontal, &semantics)
            .with_context(|| format!("failed to build {} horizontal pass", self.variant))?;
        let vertical = match PipelineStage::create(host, pair.vertical, &semantics) {
            Ok(stage) => stage,
            Err(e) => {
                horizontal.destroy(host);
                return Err(e).with_context(|| format!("failed to build {} vertical pass", self.variant));
            }
        };
        self.stages = Some(Stages { horizontal, vertical });
        self.state = PipelineState::Initialized;
        tracing::info!(variant = %self.variant, "blur pipeline initialised");

        self.upload_kernel(host);
        if let Some([w, h]) = self.output_size {
            self.bind_size(host, w, h)?;
        }
        Ok(())
    }

    /// Compile both programs again and re-upload every uniform.
    pub fn recompile(&mut self, host: &mut dyn GraphicsHost) -> Result<()> {
        let Some(stages) = self.stages.as_mut() else {
            bail!("blur pipeline is not initialised");
        };
        stages
            .horizontal
            .recompile(host)
            .context("failed to recompile horizontal pass")?;
        stages
            .vertical
            .recompile(host)
            .context("failed to recompile vertical pass")?;
        self.upload_kernel(host);
        self.upload_texel_offsets(host);
        self.upload_aspect_ratio(host);
        Ok(())
    }

    pub fn on_output_size_changed(&mut self, host: &mut dyn GraphicsHost, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            bail!("blur output size must be non-zero, got {width}x{height}");
        }
        self.output_size = Some([width, height]);
        if self.stages.is_none() {
            return Ok(());
        }
        self.bind_size(host, width, height)
    }

    fn bind_size(&mut self, host: &mut dyn GraphicsHost, width: u32, height: u32) -> Result<()> {
        let Some(stages) = self.stages.as_mut() else {
            return Ok(());
        };
        stages
            .horizontal
            .resize_framebuffer(host, width, height)
            .context("failed to allocate intermediate blur framebuffer")?;
        self.upload_texel_offsets(host);
        self.upload_aspect_ratio(host);
        if self.state < PipelineState::SizeBound {
            self.state = PipelineState::SizeBound;
        }
        tracing::info!(width, height, aspect_ratio = self.aspect_ratio(), "blur output size bound");
        Ok(())
    }

    /// Apply queued parameter changes, then run both passes.
    pub fn render(&mut self, host: &mut dyn GraphicsHost, input: TextureId, target: RenderTarget) -> Result<()> {
        if self.state < PipelineState::SizeBound {
            bail!("blur pipeline rendered before an output size was bound ({:?})", self.state);
        }
        for update in self.pending.drain() {
            self.apply(host, update);
        }

        let Some(stages) = self.stages.as_ref() else {
            bail!("blur pipeline has no programs");
        };
        let intermediate_fb = stages
            .horizontal
            .framebuffer()
            .context("intermediate framebuffer missing")?;
        let intermediate = host
            .framebuffer_texture(intermediate_fb)
            .context("intermediate framebuffer has no texture")?;

        host.draw(
            stages.horizontal.program(),
            &[input],
            RenderTarget::Framebuffer(intermediate_fb),
        )
        .context("horizontal blur pass failed")?;
        host.draw(stages.vertical.program(), &[intermediate], target)
            .context("vertical blur pass failed")?;

        self.state = PipelineState::Rendering;
        Ok(())
    }

    /// Apply one update immediately. Must run on the render thread.
    pub fn apply(&mut self, host: &mut dyn GraphicsHost, update: ParameterUpdate) {
        match update {
            ParameterUpdate::BlurSize(value) => self.apply_blur_size(host, value),
            other => tracing::debug!(?other, "update has no effect on a plain blur pipeline"),
        }
    }

    pub fn apply_blur_size(&mut self, host: &mut dyn GraphicsHost, value: f32) {
        self.store_blur_size(value);
        match self.variant.blur_size_target() {
            BlurSizeTarget::TexelSpacing => self.upload_texel_offsets(host),
            BlurSizeTarget::Radius => self.upload_kernel(host),
        }
    }

    /// Upload `value` to every stage that declares the uniform.
    pub fn upload_to_stages(&self, host: &mut dyn GraphicsHost, semantic: UniformSemantic, value: UniformValue) {
        let Some(stages) = self.stages.as_ref() else {
            return;
        };
        for stage in [&stages.horizontal, &stages.vertical] {
            if !stage.upload(host, semantic, value.clone()) {
                tracing::debug!(stage = stage.label(), uniform = semantic.uniform_name(), "skipped upload");
            }
        }
    }

    pub fn destroy(&mut self, host: &mut dyn GraphicsHost) {
        if let Some(stages) = self.stages.take() {
            stages.horizontal.destroy(host);
            stages.vertical.destroy(host);
            tracing::info!(variant = %self.variant, "blur pipeline destroyed");
        }
        self.kernel = None;
        self.state = PipelineState::Uninitialized;
    }

    fn semantics(&self) -> Vec<UniformSemantic> {
        self.variant
            .uniform_names()
            .iter()
            .filter_map(|name| UniformSemantic::from_uniform_name(name))
            .chain([UniformSemantic::AspectRatio])
            .collect()
    }

    fn store_blur_size(&mut self, value: f32) {
        let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
        match self.variant.blur_size_target() {
            BlurSizeTarget::TexelSpacing => self.ratios = TexelOffsetRatios::uniform(value),
            BlurSizeTarget::Radius => {
                let sigma = self.params.sigma;
                self.params = BlurParameters::new(value);
                self.params.sigma = sigma;
            }
        }
    }

    fn upload_texel_offsets(&self, host: &mut dyn GraphicsHost) {
        let (Some(stages), Some((horizontal, vertical))) = (self.stages.as_ref(), self.texel_offsets()) else {
            return;
        };
        for (stage, [x, y]) in [(&stages.horizontal, horizontal), (&stages.vertical, vertical)] {
            stage.upload(host, UniformSemantic::TexelWidthOffset, UniformValue::Float(x));
            stage.upload(host, UniformSemantic::TexelHeightOffset, UniformValue::Float(y));
        }
        tracing::debug!(?horizontal, ?vertical, "uploaded texel offsets");
    }

    fn upload_aspect_ratio(&self, host: &mut dyn GraphicsHost) {
        self.upload_to_stages(host, UniformSemantic::AspectRatio, UniformValue::Float(self.aspect_ratio()));
    }

    fn upload_kernel(&mut self, host: &mut dyn GraphicsHost) {
        let mut params = self.params;
        params.aspect_ratio = self.aspect_ratio();
        let kernel = match self.variant {
            BlurVariant::Fixed9 => {
                self.kernel = None;
                return;
            }
            BlurVariant::Fixed21 | BlurVariant::Dynamic15 => self.solver.solve_parameters(&params),
        };

        if let Some(stages) = self.stages.as_ref() {
            for stage in [&stages.horizontal, &stages.vertical] {
                upload_kernel_to(host, stage, self.variant, &kernel);
            }
            tracing::debug!(
                radius = params.radius,
                blur_radius = kernel.blur_radius,
                taps = kernel.optimized_sample_count,
                "uploaded blur weights"
            );
        }
        self.kernel = Some(kernel);
    }
}

fn upload_kernel_to(host: &mut dyn GraphicsHost, stage: &PipelineStage, variant: BlurVariant, kernel: &OptimizedSampleSet) {
    match variant {
        BlurVariant::Fixed9 => {}
        BlurVariant::Fixed21 => {
            // The program reads (sampleSize - 1) / 2 collapsed weights per side.
            let sample_size = (kernel.blur_radius + 1) as i32;
            stage.upload(host, UniformSemantic::SampleSize, UniformValue::Int(sample_size));
            stage.upload(host, UniformSemantic::Weight, UniformValue::FloatArray(kernel.weights.clone()));
        }
        BlurVariant::Dynamic15 => {
            stage.upload(host, UniformSemantic::SampleSize, UniformValue::Int(kernel.sample_count as i32));
            stage.upload(
                host,
                UniformSemantic::OptimizeSampleSize,
                UniformValue::Int(kernel.optimized_sample_count as i32),
            );
            stage.upload(host, UniformSemantic::Weight, UniformValue::FloatArray(kernel.weights.clone()));
            stage.upload(host, UniformSemantic::StepOffset, UniformValue::FloatArray(kernel.offsets.clone()));
            stage.upload(
                host,
                UniformSemantic::StandardGaussianWeights,
                UniformValue::FloatArray(kernel.standard_weights.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blur::shaders::{SAMPLE_SIZE, TEXEL_HEIGHT_OFFSET, TEXEL_WIDTH_OFFSET, WEIGHT};
    use crate::host::{CompileError, SoftwareHost};

    fn bound(variant: BlurVariant, host: &mut SoftwareHost) -> TwoPassBlurPipeline {
        host.resize_surface(8, 4);
        let mut pipeline = TwoPassBlurPipeline::new(variant);
        pipeline.init(host).unwrap();
        pipeline.on_output_size_changed(host, 8, 4).unwrap();
        pipeline
    }

    #[test]
    fn state_machine_advances() {
        let mut host = SoftwareHost::new();
        host.resize_surface(8, 4);
        let mut pipeline = TwoPassBlurPipeline::new(BlurVariant::Dynamic15);
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
        pipeline.init(&mut host).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Initialized);
        pipeline.on_output_size_changed(&mut host, 8, 4).unwrap();
        assert_eq!(pipeline.state(), PipelineState::SizeBound);

        let input = host.create_texture(8, 4);
        pipeline.render(&mut host, input, RenderTarget::Surface).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Rendering);
    }

    #[test]
    fn size_before_init_is_applied_at_init() {
        let mut host = SoftwareHost::new();
        let mut pipeline = TwoPassBlurPipeline::new(BlurVariant::Fixed9);
        pipeline.on_output_size_changed(&mut host, 10, 5).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
        pipeline.init(&mut host).unwrap();
        assert_eq!(pipeline.state(), PipelineState::SizeBound);
        let (h, _) = pipeline.programs().unwrap();
        assert_eq!(
            host.uniform_value(h, TEXEL_WIDTH_OFFSET),
            Some(UniformValue::Float(8.0 / 5.0))
        );
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut host = SoftwareHost::new();
        let mut pipeline = TwoPassBlurPipeline::new(BlurVariant::Fixed9);
        assert!(pipeline.on_output_size_changed(&mut host, 0, 4).is_err());
    }

    #[test]
    fn passes_divide_by_height() {
        let mut host = SoftwareHost::new();
        let pipeline = bound(BlurVariant::Dynamic15, &mut host);
        let (h, v) = pipeline.programs().unwrap();
        assert_eq!(host.uniform_value(h, TEXEL_WIDTH_OFFSET), Some(UniformValue::Float(0.25)));
        assert_eq!(host.uniform_value(h, TEXEL_HEIGHT_OFFSET), Some(UniformValue::Float(0.0)));
        assert_eq!(host.uniform_value(v, TEXEL_WIDTH_OFFSET), Some(UniformValue::Float(0.0)));
        assert_eq!(host.uniform_value(v, TEXEL_HEIGHT_OFFSET), Some(UniformValue::Float(0.25)));
        assert_eq!(pipeline.aspect_ratio(), 0.5);
    }

    #[test]
    fn fixed21_uploads_the_collapsed_kernel() {
        let mut host = SoftwareHost::new();
        let pipeline = bound(BlurVariant::Fixed21, &mut host);
        let (h, v) = pipeline.programs().unwrap();
        // radius 9.8 spans 22 texels, read as 11 collapsed weights per side.
        assert_eq!(host.uniform_value(h, SAMPLE_SIZE), Some(UniformValue::Int(23)));
        assert_eq!(host.uniform_value(v, SAMPLE_SIZE), Some(UniformValue::Int(23)));

        let solver = WeightSolver::new(BlurVariant::Fixed21.sample_capacity().unwrap());
        let expected = solver.solve(9.8);
        let kernel = pipeline.kernel().unwrap();
        assert_eq!(kernel, &expected);
        assert_eq!(kernel.weights.len(), 12);
        assert!((kernel.kernel_sum() - 1.0).abs() < 1e-5);
        let uploaded = host.uniform_value(h, WEIGHT).unwrap();
        assert_eq!(&uploaded.as_float_array().unwrap()[..12], expected.weights.as_slice());
    }

    #[test]
    fn fixed21_caps_wide_kernels_at_the_weight_array() {
        let mut host = SoftwareHost::new();
        let mut pipeline = bound(BlurVariant::Fixed21, &mut host);
        // radius 150 falls back to a 450-texel window, far past 40 taps.
        pipeline.set_blur_size(150.0);
        let input = host.create_texture(8, 4);
        pipeline.render(&mut host, input, RenderTarget::Surface).unwrap();

        let kernel = pipeline.kernel().unwrap();
        assert_eq!(kernel.weights.len(), 41);
        assert_eq!(kernel.blur_radius, 80);
        let (h, _) = pipeline.programs().unwrap();
        assert_eq!(host.uniform_value(h, SAMPLE_SIZE), Some(UniformValue::Int(81)));
        assert!((kernel.kernel_sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn blur_size_is_deferred_until_render() {
        let mut host = SoftwareHost::new();
        let mut pipeline = bound(BlurVariant::Dynamic15, &mut host);
        let before = pipeline.kernel().unwrap().clone();

        pipeline.set_blur_size(2.0);
        assert_eq!(pipeline.kernel(), Some(&before));

        let input = host.create_texture(8, 4);
        pipeline.render(&mut host, input, RenderTarget::Surface).unwrap();
        let after = pipeline.kernel().unwrap();
        assert_eq!(after.blur_radius, 6);
        assert_eq!(after.sample_count, 3);
    }

    #[test]
    fn fixed9_blur_size_moves_texel_spacing() {
        let mut host = SoftwareHost::new();
        let mut pipeline = bound(BlurVariant::Fixed9, &mut host);
        assert!(pipeline.kernel().is_none());
        pipeline.apply_blur_size(&mut host, 2.0);
        let (_, v) = pipeline.programs().unwrap();
        assert_eq!(host.uniform_value(v, TEXEL_HEIGHT_OFFSET), Some(UniformValue::Float(0.5)));
        assert_eq!(pipeline.vertical_texel_offset_ratio(), 2.0);
    }

    #[test]
    fn custom_ratios_are_honoured() {
        let mut host = SoftwareHost::new();
        let mut pipeline = TwoPassBlurPipeline::new(BlurVariant::Dynamic15).with_texel_offset_ratios(2.0, 0.5);
        pipeline.init(&mut host).unwrap();
        pipeline.on_output_size_changed(&mut host, 4, 4).unwrap();
        assert_eq!(pipeline.texel_offsets(), Some(([0.5, 0.0], [0.0, 0.125])));
    }

    #[test]
    fn destroy_releases_everything() {
        let mut host = SoftwareHost::new();
        let mut pipeline = bound(BlurVariant::Fixed21, &mut host);
        assert_eq!(host.live_programs(), 2);
        assert_eq!(host.live_framebuffers(), 1);
        pipeline.destroy(&mut host);
        assert_eq!(host.live_programs(), 0);
        assert_eq!(host.live_framebuffers(), 0);
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
    }

    #[test]
    fn compile_failure_is_fatal() {
        let mut host = SoftwareHost::new();
        host.fail_next_compile("injected failure");
        let mut pipeline = TwoPassBlurPipeline::new(BlurVariant::Dynamic15);
        let err = pipeline.init(&mut host).unwrap_err();
        assert!(err.downcast_ref::<CompileError>().is_some());
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
        assert_eq!(host.live_programs(), 0);
    }
}
