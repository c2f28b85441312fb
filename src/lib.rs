pub mod blur;
pub mod config;
pub mod headless;
pub mod host;
pub mod render;

pub use blur::{BlurVariant, OptimizedSampleSet, TwoPassBlurPipeline, WeightSolver};
pub use config::{BlurConfig, load_config_from_path};
pub use host::{GraphicsHost, SoftwareHost};
