//! Separable Gaussian blur: weight solving, programs, the two-pass pipeline
//! and the radial (selective) compositor.

pub mod compositor;
pub mod pending;
pub mod pipeline;
pub mod selective;
pub mod shaders;
pub mod stage;
pub mod weights;

pub use compositor::{RadialMask, RadialMaskCompositor};
pub use pending::{BlurController, ParameterUpdate};
pub use pipeline::{PipelineState, TwoPassBlurPipeline};
pub use selective::SelectiveBlurFilter;
pub use shaders::{BlurVariant, ShaderProgram, ShaderProgramPair};
pub use weights::{BlurParameters, OptimizedSampleSet, WeightSolver};
