//! WGSL programs for the blur passes and the radial mask.
//!
//! Uniform names and array-size constants are the contract between
//! [`WeightSolver`](crate::blur::weights::WeightSolver) output and the GPU
//! program; keep them in sync with [`BlurVariant::uniform_names`].

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::blur::weights::{MAX_LINEAR_TAPS, SampleCapacity};

pub const GAUSSIAN_SAMPLES: usize = 9;

/// Fixed 9-tap kernel, outermost tap first.
pub const FIXED9_WEIGHTS: [f32; GAUSSIAN_SAMPLES] = [0.05, 0.09, 0.12, 0.15, 0.18, 0.15, 0.12, 0.09, 0.05];

pub const FIXED21_MAX_VERTICAL_SAMPLES: usize = 21;
pub const FIXED21_GAUSSIAN_WEIGHT_NUMBERS: usize = 41;

pub const DYNAMIC15_MAX_VERTICAL_SAMPLES: usize = 15;
pub const DYNAMIC15_GAUSSIAN_WEIGHT_NUMBERS: usize = 36;

/// Collapsed weights per side the 21-sample program can hold after the centre.
pub const FIXED21_MAX_TAPS: usize = FIXED21_GAUSSIAN_WEIGHT_NUMBERS - 1;

pub const TEXEL_WIDTH_OFFSET: &str = "texelWidthOffset";
pub const TEXEL_HEIGHT_OFFSET: &str = "texelHeightOffset";
pub const SAMPLE_SIZE: &str = "sampleSize";
pub const OPTIMIZE_SAMPLE_SIZE: &str = "optimizeSampleSize";
pub const WEIGHT: &str = "weight";
pub const STANDARD_GAUSSIAN_WEIGHTS: &str = "standardGaussianWeights";
pub const STEP_OFFSET: &str = "stepOffset";

pub const EXCLUDE_CIRCLE_POINT: &str = "excludeCirclePoint";
pub const EXCLUDE_CIRCLE_RADIUS: &str = "excludeCircleRadius";
pub const EXCLUDE_BLUR_SIZE: &str = "excludeBlurSize";
pub const ASPECT_RATIO: &str = "aspectRatio";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurVariant {
    /// Nine unrolled fetches with hardcoded weights.
    Fixed9,
    /// Collapsed weights read at whole-texel steps, with a runtime sample size.
    Fixed21,
    /// Linear-sampled taps plus residual nearest taps, up to 15 per side.
    #[default]
    Dynamic15,
}

/// What a variant's `set_blur_size` value controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurSizeTarget {
    /// Distance between taps, in texel-offset-ratio units.
    TexelSpacing,
    /// Gaussian radius fed to the weight solver.
    Radius,
}

impl BlurVariant {
    pub const ALL: [BlurVariant; 3] = [BlurVariant::Fixed9, BlurVariant::Fixed21, BlurVariant::Dynamic15];

    pub fn name(&self) -> &'static str {
        match self {
            BlurVariant::Fixed9 => "fixed9",
            BlurVariant::Fixed21 => "fixed21",
            BlurVariant::Dynamic15 => "dynamic15",
        }
    }

    pub fn uniform_names(&self) -> &'static [&'static str] {
        match self {
            BlurVariant::Fixed9 => &[TEXEL_WIDTH_OFFSET, TEXEL_HEIGHT_OFFSET],
            BlurVariant::Fixed21 => &[TEXEL_WIDTH_OFFSET, TEXEL_HEIGHT_OFFSET, SAMPLE_SIZE, WEIGHT],
            BlurVariant::Dynamic15 => &[
                TEXEL_WIDTH_OFFSET,
                TEXEL_HEIGHT_OFFSET,
                SAMPLE_SIZE,
                OPTIMIZE_SAMPLE_SIZE,
                WEIGHT,
                STEP_OFFSET,
                STANDARD_GAUSSIAN_WEIGHTS,
            ],
        }
    }

    pub fn blur_size_target(&self) -> BlurSizeTarget {
        match self {
            BlurVariant::Fixed9 => BlurSizeTarget::TexelSpacing,
            BlurVariant::Fixed21 | BlurVariant::Dynamic15 => BlurSizeTarget::Radius,
        }
    }

    pub fn default_blur_size(&self) -> f32 {
        match self {
            BlurVariant::Fixed9 => 8.0,
            BlurVariant::Fixed21 | BlurVariant::Dynamic15 => 9.8,
        }
    }

    /// Collapsed-tap capacity of the program, `None` when it uses no solver.
    pub fn sample_capacity(&self) -> Option<SampleCapacity> {
        match self {
            BlurVariant::Fixed9 => None,
            BlurVariant::Fixed21 => Some(SampleCapacity {
                linear_taps: 0,
                total_taps: FIXED21_MAX_TAPS,
            }),
            BlurVariant::Dynamic15 => Some(SampleCapacity {
                linear_taps: MAX_LINEAR_TAPS,
                total_taps: DYNAMIC15_MAX_VERTICAL_SAMPLES,
            }),
        }
    }

    pub fn program_pair(&self) -> ShaderProgramPair {
        ShaderProgramPair {
            horizontal: blur_program(*self, "horizontal"),
            vertical: blur_program(*self, "vertical"),
        }
    }
}

impl fmt::Display for BlurVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlurVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed9" | "fixed_9" | "9" => Ok(BlurVariant::Fixed9),
            "fixed21" | "fixed_21" | "21" => Ok(BlurVariant::Fixed21),
            "dynamic15" | "dynamic_15" | "15" => Ok(BlurVariant::Dynamic15),
            other => bail!("unknown blur variant '{other}' (expected fixed9, fixed21 or dynamic15)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramKind {
    Blur(BlurVariant),
    /// Two inputs: sharp first, blurred second.
    RadialMask,
}

/// A WGSL program ready for [`GraphicsHost::compile`](crate::host::GraphicsHost::compile).
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    pub label: String,
    pub kind: ProgramKind,
    /// Declarations shared between stages (constants, uniforms, bindings, helpers).
    pub common: String,
    /// A standalone vertex module (common + @vertex entry).
    pub vertex: String,
    /// A standalone fragment module (common + @fragment entry).
    pub fragment: String,
    /// A combined module containing both entry points.
    pub module: String,
}

/// The two passes of a separable blur. Both compile the same source; only
/// the uploaded texel offsets differ.
#[derive(Clone, Debug)]
pub struct ShaderProgramPair {
    pub horizontal: ShaderProgram,
    pub vertical: ShaderProgram,
}

pub(crate) fn fmt_f32(v: f32) -> String {
    if v.is_finite() {
        format!("{v:?}")
    } else {
        "0.0".to_string()
    }
}

const FULLSCREEN_COMMON: &str = r#"
struct VSOut {
    @builtin(position) position: vec4f,
    @location(0) uv: vec2f,
};

@group(1) @binding(0)
var src_tex: texture_2d<f32>;
@group(1) @binding(1)
var src_samp: sampler;

fn texelCoord(uv: vec2f, dims: vec2u) -> vec2i {
    let last = vec2i(dims) - vec2i(1);
    let xy = vec2i(floor(uv * vec2f(dims)));
    return clamp(xy, vec2i(0), last);
}
"#;

const FULLSCREEN_VERTEX: &str = r#"
@vertex
fn vs_main(@location(0) position: vec4f, @location(1) inputTextureCoordinate: vec2f) -> VSOut {
    var out: VSOut;
    out.position = position;
    out.uv = inputTextureCoordinate;
    return out;
}
"#;

const BLUR_HELPERS: &str = r#"
fn sampleRgb(uv: vec2f) -> vec3f {
    return textureSampleLevel(src_tex, src_samp, uv, 0.0).rgb;
}

// Alpha is never blurred: it comes from the centre texel.
fn centreAlpha(uv: vec2f) -> f32 {
    let dims = textureDimensions(src_tex);
    return textureLoad(src_tex, texelCoord(uv, dims), 0).a;
}
"#;

fn build_fullscreen_program(label: String, kind: ProgramKind, declarations: &str, fragment_body: String) -> ShaderProgram {
    let common = format!("{declarations}{FULLSCREEN_COMMON}");
    let common = match kind {
        ProgramKind::Blur(_) => format!("{common}{BLUR_HELPERS}"),
        ProgramKind::RadialMask => common,
    };

    let fragment_entry = format!(
        r#"
@fragment
fn fs_main(in: VSOut) -> @location(0) vec4f {{
{fragment_body}
}}
"#
    );

    let vertex = format!("{common}{FULLSCREEN_VERTEX}");
    let fragment = format!("{common}{fragment_entry}");
    let module = format!("{common}{FULLSCREEN_VERTEX}{fragment_entry}");

    ShaderProgram {
        label,
        kind,
        common,
        vertex,
        fragment,
        module,
    }
}

fn blur_program(variant: BlurVariant, pass: &str) -> ShaderProgram {
    let label = format!("{variant} {pass} blur");
    let kind = ProgramKind::Blur(variant);
    match variant {
        BlurVariant::Fixed9 => build_fullscreen_program(label, kind, FIXED9_DECLS, fixed9_body()),
        BlurVariant::Fixed21 => build_fullscreen_program(label, kind, &fixed21_decls(), FIXED21_BODY.to_string()),
        BlurVariant::Dynamic15 => {
            build_fullscreen_program(label, kind, &dynamic15_decls(), DYNAMIC15_BODY.to_string())
        }
    }
}

const FIXED9_DECLS: &str = r#"
const GAUSSIAN_SAMPLES: i32 = 9;

struct BlurUniforms {
    texelWidthOffset: f32,
    texelHeightOffset: f32,
};

@group(0) @binding(0)
var<uniform> blur: BlurUniforms;
"#;

fn fixed9_body() -> String {
    let half = (GAUSSIAN_SAMPLES as i32 - 1) / 2;
    let mut body = String::from(
        "    let texelStep = vec2f(blur.texelWidthOffset, blur.texelHeightOffset);\n    var sum = vec3f(0.0);\n",
    );
    for (i, weight) in FIXED9_WEIGHTS.iter().enumerate() {
        let multiplier = i as i32 - half;
        body.push_str(&format!(
            "    sum = sum + sampleRgb(in.uv + texelStep * {}) * {};\n",
            fmt_f32(multiplier as f32),
            fmt_f32(*weight)
        ));
    }
    body.push_str("    return vec4f(sum, centreAlpha(in.uv));");
    body
}

fn vec4_slots(scalars: usize) -> usize {
    scalars.div_ceil(4)
}

fn fixed21_decls() -> String {
    format!(
        r#"
const MAX_VERTICAL_SAMPLES: i32 = {FIXED21_MAX_VERTICAL_SAMPLES};
const GAUSSIAN_WEIGHT_NUMBERS: i32 = {FIXED21_GAUSSIAN_WEIGHT_NUMBERS};

struct BlurUniforms {{
    texelWidthOffset: f32,
    texelHeightOffset: f32,
    sampleSize: i32,
    weight: array<vec4f, {weight_slots}>,
}};

@group(0) @binding(0)
var<uniform> blur: BlurUniforms;

fn weightAt(i: i32) -> f32 {{
    return blur.weight[i / 4][i % 4];
}}
"#,
        weight_slots = vec4_slots(FIXED21_GAUSSIAN_WEIGHT_NUMBERS),
    )
}

const FIXED21_BODY: &str = r#"    let texelStep = vec2f(blur.texelWidthOffset, blur.texelHeightOffset);
    var sum = sampleRgb(in.uv) * weightAt(0);
    let taps = min((blur.sampleSize - 1) / 2, GAUSSIAN_WEIGHT_NUMBERS - 1);
    for (var i: i32 = 1; i <= taps; i = i + 1) {
        let delta = texelStep * f32(i);
        sum = sum + (sampleRgb(in.uv + delta) + sampleRgb(in.uv - delta)) * weightAt(i);
    }
    return vec4f(sum, centreAlpha(in.uv));"#;

fn dynamic15_decls() -> String {
    format!(
        r#"
const MAX_LINEAR_SAMPLES: i32 = {MAX_LINEAR_TAPS};
const MAX_VERTICAL_SAMPLES: i32 = {DYNAMIC15_MAX_VERTICAL_SAMPLES};
const GAUSSIAN_WEIGHT_NUMBERS: i32 = {DYNAMIC15_GAUSSIAN_WEIGHT_NUMBERS};

struct BlurUniforms {{
    texelWidthOffset: f32,
    texelHeightOffset: f32,
    sampleSize: i32,
    optimizeSampleSize: i32,
    weight: array<vec4f, {weight_slots}>,
    stepOffset: array<vec4f, {offset_slots}>,
    standardGaussianWeights: array<vec4f, {standard_slots}>,
}};

@group(0) @binding(0)
var<uniform> blur: BlurUniforms;

fn weightAt(i: i32) -> f32 {{
    return blur.weight[i / 4][i % 4];
}}

fn stepOffsetAt(i: i32) -> f32 {{
    return blur.stepOffset[i / 4][i % 4];
}}

fn standardWeightAt(i: i32) -> f32 {{
    return blur.standardGaussianWeights[i / 4][i % 4];
}}
"#,
        weight_slots = vec4_slots(DYNAMIC15_MAX_VERTICAL_SAMPLES + 1),
        offset_slots = vec4_slots(DYNAMIC15_MAX_VERTICAL_SAMPLES),
        standard_slots = vec4_slots(DYNAMIC15_GAUSSIAN_WEIGHT_NUMBERS),
    )
}

const DYNAMIC15_BODY: &str = r#"    let texelStep = vec2f(blur.texelWidthOffset, blur.texelHeightOffset);
    var sum = sampleRgb(in.uv) * weightAt(0);
    let linearTaps = clamp(blur.sampleSize, 0, MAX_LINEAR_SAMPLES);
    for (var i: i32 = 0; i < linearTaps; i = i + 1) {
        let delta = texelStep * stepOffsetAt(i);
        sum = sum + (sampleRgb(in.uv + delta) + sampleRgb(in.uv - delta)) * weightAt(i + 1);
    }
    // Taps past the linear budget fetch both texels of the pair directly.
    let totalTaps = min(blur.optimizeSampleSize, MAX_VERTICAL_SAMPLES);
    for (var j: i32 = linearTaps; j < totalTaps; j = j + 1) {
        let inner = 2 * j + 1;
        let outer = 2 * j + 2;
        if (outer >= GAUSSIAN_WEIGHT_NUMBERS) {
            break;
        }
        let innerDelta = texelStep * f32(inner);
        let outerDelta = texelStep * f32(outer);
        sum = sum + (sampleRgb(in.uv + innerDelta) + sampleRgb(in.uv - innerDelta)) * standardWeightAt(inner);
        sum = sum + (sampleRgb(in.uv + outerDelta) + sampleRgb(in.uv - outerDelta)) * standardWeightAt(outer);
    }
    return vec4f(sum, centreAlpha(in.uv));"#;

const RADIAL_MASK_DECLS: &str = r#"
struct MaskUniforms {
    excludeCirclePoint: vec2f,
    excludeCircleRadius: f32,
    excludeBlurSize: f32,
    aspectRatio: f32,
};

@group(0) @binding(0)
var<uniform> mask: MaskUniforms;

@group(1) @binding(2)
var blurred_tex: texture_2d<f32>;

fn radialMix(dist: f32) -> f32 {
    let inner = mask.excludeCircleRadius - mask.excludeBlurSize;
    let outer = mask.excludeCircleRadius;
    if (outer <= inner) {
        return select(0.0, 1.0, dist >= outer);
    }
    return smoothstep(inner, outer, dist);
}
"#;

const RADIAL_MASK_BODY: &str = r#"    let sharp = textureSampleLevel(src_tex, src_samp, in.uv, 0.0);
    let blurred = textureSampleLevel(blurred_tex, src_samp, in.uv, 0.0);
    let coord = vec2f(in.uv.x, in.uv.y * mask.aspectRatio + 0.5 - 0.5 * mask.aspectRatio);
    let dist = distance(mask.excludeCirclePoint, coord);
    return mix(sharp, blurred, radialMix(dist));"#;

pub const RADIAL_MASK_UNIFORMS: [&str; 4] = [
    EXCLUDE_CIRCLE_POINT,
    EXCLUDE_CIRCLE_RADIUS,
    EXCLUDE_BLUR_SIZE,
    ASPECT_RATIO,
];

pub fn radial_mask_program() -> ShaderProgram {
    build_fullscreen_program(
        "radial mask".to_string(),
        ProgramKind::RadialMask,
        RADIAL_MASK_DECLS,
        RADIAL_MASK_BODY.to_string(),
    )
}
