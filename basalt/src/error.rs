use crate::backend::AccelerationStructureLevel;
use crate::scene::SceneKind;
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccelError {
    #[error("{0:?} level acceleration structure prebuild info reported zero size")]
    ZeroPrebuildSize(AccelerationStructureLevel),

    #[error("scene has no geometry to build an acceleration structure from")]
    EmptyScene,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to create pipeline \"{name}\": {reason}")]
    Creation { name: &'static str, reason: String },

    #[error("pipeline \"{name}\" has no shader group exported as \"{export}\"")]
    MissingExport { name: &'static str, export: &'static str },
}

#[derive(Debug, Error)]
pub enum DenoiseError {
    #[error("denoiser rejected a {width}x{height} image: {reason}")]
    Filter { width: u32, height: u32, reason: String },

    #[error("no lightmap has been baked yet")]
    NothingBaked,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("no preset configured for scene \"{0}\"")]
    MissingScenePreset(SceneKind),

    #[error("scene \"{0}\" must be loaded from a file, which requires an external scene loader")]
    UnsupportedScene(SceneKind),

    #[error("setting \"{name}\" is {value}, expected {min} to {max}")]
    InvalidSetting {
        name: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Accel(#[from] AccelError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Denoise(#[from] DenoiseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write {}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
