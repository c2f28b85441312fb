//! The graphics layer the blur pipeline draws through.
//!
//! Context creation, surfaces and asset loading belong to whoever implements
//! [`GraphicsHost`]. The pipeline only compiles programs, resolves and uploads
//! uniforms, owns framebuffers, and issues full-screen draws.

pub mod software;
pub mod uniform_block;
pub mod validation;

use std::fmt;

use anyhow::Result;

use crate::blur::shaders::ShaderProgram;

pub use software::SoftwareHost;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

/// Handle of one uniform inside one program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    FloatArray(Vec<f32>),
    Vec2([f32; 2]),
}

impl UniformValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "float",
            UniformValue::Int(_) => "int",
            UniformValue::FloatArray(_) => "float[]",
            UniformValue::Vec2(_) => "vec2",
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            UniformValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            UniformValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<[f32; 2]> {
        match self {
            UniformValue::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float_array(&self) -> Option<&[f32]> {
        match self {
            UniformValue::FloatArray(v) => Some(v),
            _ => None,
        }
    }
}

/// Where a draw call writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderTarget {
    /// The host's presentation surface.
    Surface,
    Framebuffer(FramebufferId),
}

/// A shader program that failed to build. Fatal for the pipeline owning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Parse { label: String, message: String },
    Validation { label: String, message: String },
}

impl CompileError {
    pub fn label(&self) -> &str {
        match self {
            CompileError::Parse { label, .. } | CompileError::Validation { label, .. } => label,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse { label, message } => {
                write!(f, "{label}: WGSL parse failed:\n{message}")
            }
            CompileError::Validation { label, message } => {
                write!(f, "{label}: WGSL validation failed: {message}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

pub trait GraphicsHost {
    fn compile(&mut self, program: &ShaderProgram) -> Result<ProgramId, CompileError>;

    fn delete_program(&mut self, program: ProgramId);

    /// `None` when the program has no active uniform called `name`.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Uploads that do not fit the uniform's declared type are dropped.
    fn upload_uniform(&mut self, program: ProgramId, location: UniformLocation, value: &UniformValue);

    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferId>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<TextureId>;

    /// Draw a full-screen quad with `program`, binding `inputs` in order.
    fn draw(&mut self, program: ProgramId, inputs: &[TextureId], target: RenderTarget) -> Result<()>;
}
