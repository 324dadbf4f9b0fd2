mod accel;
mod backend;
mod bake;
mod camera;
mod cluster;
mod denoise;
mod error;
mod geometry;
mod maths;
mod params;
mod path_trace;
mod progress;
mod recorder;
mod renderer;
mod sbt;
mod scene;
mod settings;
mod usage;

pub mod prelude {
    pub use crate::accel::*;
    pub use crate::backend::*;
    pub use crate::bake::*;
    pub use crate::camera::*;
    pub use crate::cluster::*;
    pub use crate::denoise::*;
    pub use crate::error::{AccelError, ConfigError, DenoiseError, Error, PipelineError};
    pub use crate::geometry::*;
    pub use crate::maths::*;
    pub use crate::params::*;
    pub use crate::path_trace::*;
    pub use crate::progress::*;
    pub use crate::recorder::*;
    pub use crate::renderer::*;
    pub use crate::sbt::*;
    pub use crate::scene::*;
    pub use crate::settings::*;
    pub use crate::usage::*;
}
