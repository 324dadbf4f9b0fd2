use crate::error::ConfigError;
use crate::maths::*;
use crate::scene::*;
use crate::settings::*;
use std::path::PathBuf;
use structopt::StructOpt;
use strum::VariantNames;

pub fn try_bool_from_str(s: &str) -> Result<bool, String> {
    match s {
        "enable" => Ok(true),
        "disable" => Ok(false),
        _ => Err(format!("{:?} is not one of enable/disable.", s)),
    }
}

type BoolParam = bool;

#[derive(Debug, StructOpt)]
pub struct RendererParams {
    /// Image width
    #[structopt(short, long, default_value = "1920", global = true, display_order = 1)]
    pub width: u32,

    /// Image height
    #[structopt(short, long, default_value = "1080", global = true, display_order = 2)]
    pub height: u32,

    /// Render settings to start from, as JSON
    #[structopt(long, parse(from_os_str), global = true)]
    pub settings: Option<PathBuf>,

    /// Scene presets, as JSON keyed by scene name
    #[structopt(long, parse(from_os_str), global = true)]
    pub presets: Option<PathBuf>,

    /// Scene to render
    #[structopt(long, possible_values=SceneKind::VARIANTS, global = true)]
    pub scene: Option<SceneKind>,

    /// Square root of the number of samples per pixel
    #[structopt(short = "s", long, global = true)]
    pub sqrt_num_samples: Option<u32>,

    /// Maximum number of path segments
    #[structopt(short = "p", long, global = true)]
    pub max_path_length: Option<u32>,

    /// Path trace when enabled, otherwise rasterize with clustered lights
    #[structopt(long, parse(try_from_str=try_bool_from_str), default_value="enable", global=true)]
    pub ray_tracing: BoolParam,

    /// Restart accumulation every frame
    #[structopt(long, parse(try_from_str=try_bool_from_str), default_value="disable", global=true)]
    pub always_reset: BoolParam,

    /// Maximum number of spot lights to cluster
    #[structopt(long, global = true)]
    pub max_lights: Option<u32>,

    /// Width and height of the lightmap in texels
    #[structopt(long, global = true)]
    pub lightmap_resolution: Option<u32>,
}

impl RendererParams {
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Loads the settings file if one was given, then applies command line overrides.
    pub fn render_settings(&self) -> Result<RenderSettings, ConfigError> {
        let mut settings = match self.settings.as_ref() {
            Some(path) => RenderSettings::load(path)?,
            None => RenderSettings::default(),
        };
        if let Some(scene) = self.scene {
            settings.current_scene = scene;
        }
        if let Some(sqrt_num_samples) = self.sqrt_num_samples {
            settings.path_trace.sqrt_num_samples = sqrt_num_samples;
        }
        if let Some(max_path_length) = self.max_path_length {
            settings.path_trace.max_path_length = max_path_length;
        }
        if let Some(max_lights) = self.max_lights {
            settings.max_light_clamp = max_lights;
        }
        if let Some(lightmap_resolution) = self.lightmap_resolution {
            settings.lightmap_resolution = lightmap_resolution;
        }
        settings.enable_ray_tracing = self.ray_tracing;
        settings.always_reset_path_trace = self.always_reset;
        settings.validate()?;
        Ok(settings)
    }

    pub fn scene_presets(&self) -> Result<ScenePresets, ConfigError> {
        match self.presets.as_ref() {
            Some(path) => ScenePresets::load(path),
            None => Ok(ScenePresets::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let params = RendererParams::from_iter_safe(&[
            "replay",
            "--scene",
            "white-furnace",
            "-s",
            "2",
            "--ray-tracing",
            "disable",
            "--lightmap-resolution",
            "256",
        ])
        .unwrap();
        let settings = params.render_settings().unwrap();
        assert_eq!(settings.current_scene, SceneKind::WhiteFurnace);
        assert_eq!(settings.path_trace.sqrt_num_samples, 2);
        assert_eq!(settings.path_trace.max_path_length, PathTraceSettings::default().max_path_length);
        assert!(!settings.enable_ray_tracing);
        assert_eq!(settings.lightmap_resolution, 256);
        assert_eq!(params.size(), UVec2::new(1920, 1080));
    }

    #[test]
    fn overrides_are_validated() {
        let params = RendererParams::from_iter_safe(&["replay", "--lightmap-resolution", "0"]).unwrap();
        assert!(matches!(
            params.render_settings(),
            Err(ConfigError::InvalidSetting {
                name: "lightmap_resolution",
                ..
            })
        ));
    }

    #[test]
    fn bool_params_need_enable_or_disable() {
        assert_eq!(try_bool_from_str("enable"), Ok(true));
        assert_eq!(try_bool_from_str("disable"), Ok(false));
        assert!(try_bool_from_str("yes").is_err());
        assert!(RendererParams::from_iter_safe(&["replay", "--always-reset", "on"]).is_err());
    }
}
