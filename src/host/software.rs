//! CPU reference implementation of [`GraphicsHost`].
//!
//! Programs are validated and reflected with naga exactly as a GPU backend
//! would consume them. Uniform uploads land in byte blocks at the reflected
//! offsets and every draw reads its parameters back from those bytes, then
//! evaluates the program's per-pixel math on `Rgba32FImage` buffers.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};
use image::{DynamicImage, Rgba, Rgba32FImage, RgbaImage};

use crate::blur::compositor::{RadialMask, mix_rgba};
use crate::blur::shaders::{
    ASPECT_RATIO, BlurVariant, DYNAMIC15_GAUSSIAN_WEIGHT_NUMBERS, DYNAMIC15_MAX_VERTICAL_SAMPLES, EXCLUDE_BLUR_SIZE,
    EXCLUDE_CIRCLE_POINT, EXCLUDE_CIRCLE_RADIUS, FIXED9_WEIGHTS, FIXED21_GAUSSIAN_WEIGHT_NUMBERS, OPTIMIZE_SAMPLE_SIZE,
    ProgramKind, SAMPLE_SIZE, STANDARD_GAUSSIAN_WEIGHTS, STEP_OFFSET, ShaderProgram, TEXEL_HEIGHT_OFFSET,
    TEXEL_WIDTH_OFFSET, WEIGHT,
};
use crate::blur::weights::MAX_LINEAR_TAPS;
use crate::host::uniform_block::UniformBlocks;
use crate::host::validation::{UniformLayout, reflect_uniforms, validate_program};
use crate::host::{
    CompileError, FramebufferId, GraphicsHost, ProgramId, RenderTarget, TextureId, UniformLocation, UniformValue,
};

/// Bits of sub-texel precision in the bilinear filter, as on common GPUs.
const SUBTEXEL_STEPS: f32 = 256.0;

#[derive(Debug)]
struct Program {
    label: String,
    kind: ProgramKind,
    layout: UniformLayout,
    uniforms: UniformBlocks,
}

impl Program {
    fn value(&self, name: &str) -> Option<UniformValue> {
        let (_, field) = self.layout.field(name)?;
        self.uniforms.read(field)
    }

    fn float(&self, name: &str) -> f32 {
        self.value(name).and_then(|v| v.as_float()).unwrap_or(0.0)
    }

    fn int(&self, name: &str) -> i32 {
        self.value(name).and_then(|v| v.as_int()).unwrap_or(0)
    }

    fn vec2(&self, name: &str) -> [f32; 2] {
        self.value(name).and_then(|v| v.as_vec2()).unwrap_or([0.0, 0.0])
    }

    fn floats(&self, name: &str) -> Vec<f32> {
        match self.value(name) {
            Some(UniformValue::FloatArray(values)) => values,
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct SoftwareHost {
    next_id: u32,
    programs: BTreeMap<ProgramId, Program>,
    textures: BTreeMap<TextureId, Rgba32FImage>,
    framebuffers: BTreeMap<FramebufferId, TextureId>,
    surface: Rgba32FImage,
    draw_calls: usize,
    injected_failure: Option<String>,
}

impl Default for SoftwareHost {
    fn default() -> Self {
        Self {
            next_id: 0,
            programs: BTreeMap::new(),
            textures: BTreeMap::new(),
            framebuffers: BTreeMap::new(),
            surface: Rgba32FImage::new(0, 0),
            draw_calls: 0,
            injected_failure: None,
        }
    }
}

impl SoftwareHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_surface(width: u32, height: u32) -> Self {
        let mut host = Self::new();
        host.resize_surface(width, height);
        host
    }

    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = Rgba32FImage::new(width, height);
    }

    pub fn surface_size(&self) -> [u32; 2] {
        [self.surface.width(), self.surface.height()]
    }

    pub fn surface(&self) -> &Rgba32FImage {
        &self.surface
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// A transparent black texture.
    pub fn create_texture(&mut self, width: u32, height: u32) -> TextureId {
        self.insert_texture(Rgba32FImage::new(width, height))
    }

    pub fn upload_texture(&mut self, image: &RgbaImage) -> TextureId {
        self.insert_texture(DynamicImage::ImageRgba8(image.clone()).into_rgba32f())
    }

    pub fn upload_texture_f32(&mut self, image: Rgba32FImage) -> TextureId {
        self.insert_texture(image)
    }

    fn insert_texture(&mut self, image: Rgba32FImage) -> TextureId {
        let id = TextureId(self.next_id());
        self.textures.insert(id, image);
        id
    }

    pub fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    pub fn texture(&self, texture: TextureId) -> Option<&Rgba32FImage> {
        self.textures.get(&texture)
    }

    pub fn read_target(&self, target: RenderTarget) -> Option<Rgba32FImage> {
        match target {
            RenderTarget::Surface => Some(self.surface.clone()),
            RenderTarget::Framebuffer(fb) => {
                let texture = self.framebuffers.get(&fb)?;
                self.textures.get(texture).cloned()
            }
        }
    }

    pub fn read_target_rgba8(&self, target: RenderTarget) -> Option<RgbaImage> {
        self.read_target(target)
            .map(|image| DynamicImage::ImageRgba32F(image).into_rgba8())
    }

    /// Current value of a uniform, decoded from the program's buffer bytes.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        self.programs.get(&program)?.value(name)
    }

    pub fn uniform_layout(&self, program: ProgramId) -> Option<&UniformLayout> {
        self.programs.get(&program).map(|p| &p.layout)
    }

    pub fn draw_call_count(&self) -> usize {
        self.draw_calls
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Live program handles, oldest first.
    pub fn program_handles(&self) -> Vec<ProgramId> {
        self.programs.keys().copied().collect()
    }

    /// Make the next `compile` fail with a validation error.
    pub fn fail_next_compile(&mut self, message: impl Into<String>) {
        self.injected_failure = Some(message.into());
    }

    fn target_size(&self, target: RenderTarget) -> Result<[u32; 2]> {
        let [width, height] = match target {
            RenderTarget::Surface => self.surface_size(),
            RenderTarget::Framebuffer(fb) => {
                let texture = self
                    .framebuffers
                    .get(&fb)
                    .ok_or_else(|| anyhow!("unknown framebuffer {fb:?}"))?;
                let image = self
                    .textures
                    .get(texture)
                    .ok_or_else(|| anyhow!("framebuffer {fb:?} lost its texture"))?;
                [image.width(), image.height()]
            }
        };
        if width == 0 || height == 0 {
            bail!("render target {target:?} has zero size");
        }
        Ok([width, height])
    }
}

impl GraphicsHost for SoftwareHost {
    fn compile(&mut self, program: &ShaderProgram) -> Result<ProgramId, CompileError> {
        if let Some(message) = self.injected_failure.take() {
            return Err(CompileError::Validation {
                label: program.label.clone(),
                message,
            });
        }
        let module = validate_program(program)?;
        let layout = reflect_uniforms(&module);
        let uniforms = UniformBlocks::for_layout(&layout);
        let id = ProgramId(self.next_id());
        tracing::debug!(program = %program.label, ?id, uniforms = layout.fields.len(), "compiled program");
        self.programs.insert(
            id,
            Program {
                label: program.label.clone(),
                kind: program.kind,
                layout,
                uniforms,
            },
        );
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let (index, _) = self.programs.get(&program)?.layout.field(name)?;
        Some(UniformLocation(index as u32))
    }

    fn upload_uniform(&mut self, program: ProgramId, location: UniformLocation, value: &UniformValue) {
        let Some(program) = self.programs.get_mut(&program) else {
            return;
        };
        let Some(field) = program.layout.field_at(location.0 as usize) else {
            return;
        };
        if !program.uniforms.write(field, value) {
            tracing::debug!(
                program = %program.label,
                uniform = %field.name,
                value = value.kind_name(),
                "uniform upload type mismatch; ignored"
            );
        }
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferId> {
        if width == 0 || height == 0 {
            bail!("cannot create a {width}x{height} framebuffer");
        }
        let texture = self.create_texture(width, height);
        let id = FramebufferId(self.next_id());
        self.framebuffers.insert(id, texture);
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(texture) = self.framebuffers.remove(&framebuffer) {
            self.textures.remove(&texture);
        }
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer).copied()
    }

    fn draw(&mut self, program: ProgramId, inputs: &[TextureId], target: RenderTarget) -> Result<()> {
        let [width, height] = self.target_size(target)?;
        if let RenderTarget::Framebuffer(fb) = target {
            let texture = self.framebuffers.get(&fb).copied();
            if texture.is_some_and(|t| inputs.contains(&t)) {
                bail!("framebuffer {fb:?} is both sampled and rendered to");
            }
        }

        let program = self
            .programs
            .get(&program)
            .ok_or_else(|| anyhow!("unknown program {program:?}"))?;
        let images = inputs
            .iter()
            .map(|id| {
                self.textures
                    .get(id)
                    .ok_or_else(|| anyhow!("unknown texture {id:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let output = match program.kind {
            ProgramKind::Blur(variant) => {
                let source = images
                    .first()
                    .with_context(|| format!("{} needs an input texture", program.label))?;
                let kernel = BlurKernel::from_uniforms(variant, program);
                kernel.shade(source, width, height)
            }
            ProgramKind::RadialMask => {
                let [sharp, blurred] = images.as_slice() else {
                    bail!("{} needs exactly two input textures", program.label);
                };
                let mask = RadialMask {
                    center: program.vec2(EXCLUDE_CIRCLE_POINT),
                    radius: program.float(EXCLUDE_CIRCLE_RADIUS),
                    transition_width: program.float(EXCLUDE_BLUR_SIZE),
                    aspect_ratio: program.float(ASPECT_RATIO),
                };
                shade_radial_mask(sharp, blurred, &mask, width, height)
            }
        };
        tracing::debug!(program = %program.label, width, height, "draw");

        match target {
            RenderTarget::Surface => self.surface = output,
            RenderTarget::Framebuffer(fb) => {
                let texture = self
                    .framebuffers
                    .get(&fb)
                    .copied()
                    .ok_or_else(|| anyhow!("unknown framebuffer {fb:?}"))?;
                self.textures.insert(texture, output);
            }
        }
        self.draw_calls += 1;
        Ok(())
    }
}

/// Fetches of one blur pass: `(multiplier, weight)` along the texel step.
struct BlurKernel {
    texel_step: [f32; 2],
    taps: Vec<(f32, f32)>,
}

impl BlurKernel {
    fn from_uniforms(variant: BlurVariant, program: &Program) -> Self {
        let texel_step = [program.float(TEXEL_WIDTH_OFFSET), program.float(TEXEL_HEIGHT_OFFSET)];
        let mut taps = Vec::new();

        match variant {
            BlurVariant::Fixed9 => {
                let half = (FIXED9_WEIGHTS.len() as i32 - 1) / 2;
                for (i, w) in FIXED9_WEIGHTS.iter().enumerate() {
                    taps.push(((i as i32 - half) as f32, *w));
                }
            }
            BlurVariant::Fixed21 => {
                let weights = program.floats(WEIGHT);
                taps.push((0.0, at(&weights, 0)));
                let max = FIXED21_GAUSSIAN_WEIGHT_NUMBERS as i32 - 1;
                let count = ((program.int(SAMPLE_SIZE) - 1) / 2).min(max);
                for i in 1..=count {
                    push_pair(&mut taps, i as f32, at(&weights, i));
                }
            }
            BlurVariant::Dynamic15 => {
                let weights = program.floats(WEIGHT);
                let offsets = program.floats(STEP_OFFSET);
                let standard = program.floats(STANDARD_GAUSSIAN_WEIGHTS);
                taps.push((0.0, at(&weights, 0)));

                let linear = program.int(SAMPLE_SIZE).clamp(0, MAX_LINEAR_TAPS as i32);
                for i in 0..linear {
                    push_pair(&mut taps, at(&offsets, i), at(&weights, i + 1));
                }
                let total = program
                    .int(OPTIMIZE_SAMPLE_SIZE)
                    .min(DYNAMIC15_MAX_VERTICAL_SAMPLES as i32);
                for j in linear..total {
                    let (inner, outer) = (2 * j + 1, 2 * j + 2);
                    if outer >= DYNAMIC15_GAUSSIAN_WEIGHT_NUMBERS as i32 {
                        break;
                    }
                    push_pair(&mut taps, inner as f32, at(&standard, inner));
                    push_pair(&mut taps, outer as f32, at(&standard, outer));
                }
            }
        }

        Self { texel_step, taps }
    }

    fn shade(&self, source: &Rgba32FImage, width: u32, height: u32) -> Rgba32FImage {
        let [sx, sy] = self.texel_step;
        Rgba32FImage::from_fn(width, height, |x, y| {
            let uv = fragment_uv(x, y, width, height);
            let mut rgb = [0.0_f32; 3];
            for &(multiplier, weight) in &self.taps {
                let texel = sample_bilinear(source, [uv[0] + sx * multiplier, uv[1] + sy * multiplier]);
                for (c, v) in rgb.iter_mut().zip(texel) {
                    *c += v * weight;
                }
            }
            let alpha = load_texel(source, uv)[3];
            Rgba([rgb[0], rgb[1], rgb[2], alpha])
        })
    }
}

/// Out-of-range array reads return zero, like an unwritten uniform slot.
fn at(values: &[f32], i: i32) -> f32 {
    usize::try_from(i)
        .ok()
        .and_then(|i| values.get(i))
        .copied()
        .unwrap_or(0.0)
}

fn push_pair(taps: &mut Vec<(f32, f32)>, multiplier: f32, weight: f32) {
    taps.push((multiplier, weight));
    taps.push((-multiplier, weight));
}

fn shade_radial_mask(
    sharp: &Rgba32FImage,
    blurred: &Rgba32FImage,
    mask: &RadialMask,
    width: u32,
    height: u32,
) -> Rgba32FImage {
    Rgba32FImage::from_fn(width, height, |x, y| {
        let uv = fragment_uv(x, y, width, height);
        let t = mask.mix_factor(uv);
        Rgba(mix_rgba(sample_bilinear(sharp, uv), sample_bilinear(blurred, uv), t))
    })
}

/// Texture coordinate of the centre of output pixel `(x, y)`.
fn fragment_uv(x: u32, y: u32, width: u32, height: u32) -> [f32; 2] {
    [(x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32]
}

/// Nearest texel under `uv`, clamped to the edge.
fn load_texel(image: &Rgba32FImage, uv: [f32; 2]) -> [f32; 4] {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return [0.0; 4];
    }
    let x = (uv[0] * w as f32).floor().clamp(0.0, (w - 1) as f32) as u32;
    let y = (uv[1] * h as f32).floor().clamp(0.0, (h - 1) as f32) as u32;
    image.get_pixel(x, y).0
}

/// Clamp-to-edge bilinear filtering between texel centres.
fn sample_bilinear(image: &Rgba32FImage, uv: [f32; 2]) -> [f32; 4] {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return [0.0; 4];
    }
    let (x0, fx) = split_coord(texel_space(uv[0], w));
    let (y0, fy) = split_coord(texel_space(uv[1], h));

    let texel = |x: i64, y: i64| {
        let x = x.clamp(0, w as i64 - 1) as u32;
        let y = y.clamp(0, h as i64 - 1) as u32;
        image.get_pixel(x, y).0
    };
    let top = lerp4(texel(x0, y0), texel(x0 + 1, y0), fx);
    let bottom = lerp4(texel(x0, y0 + 1), texel(x0 + 1, y0 + 1), fx);
    lerp4(top, bottom, fy)
}

/// Texel-space position of `coord`, held within one texel of the edge so the
/// integer split below cannot overflow. NaN lands before the first texel.
fn texel_space(coord: f32, size: u32) -> f32 {
    let p = coord * size as f32 - 0.5;
    if p.is_nan() { -1.0 } else { p.clamp(-1.0, size as f32) }
}

/// Integer texel and quantised fraction of a texel-space coordinate.
fn split_coord(p: f32) -> (i64, f32) {
    let base = p.floor();
    let frac = ((p - base) * SUBTEXEL_STEPS).round() / SUBTEXEL_STEPS;
    if frac >= 1.0 {
        (base as i64 + 1, 0.0)
    } else {
        (base as i64, frac)
    }
}

fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    if t == 0.0 {
        return a;
    }
    std::array::from_fn(|i| a[i] * (1.0 - t) + b[i] * t)
}
