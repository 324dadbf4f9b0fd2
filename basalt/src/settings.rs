use crate::error::ConfigError;
use crate::scene::SceneKind;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

pub const MAX_SPOT_LIGHTS: u32 = 32;
pub const SPOT_LIGHT_ELEMENTS_PER_CLUSTER: u32 = (MAX_SPOT_LIGHTS + 31) / 32;
pub const MAX_SQRT_NUM_SAMPLES: u32 = 256;
pub const MAX_LIGHTMAP_RESOLUTION: u32 = 16384;
pub const MAX_CLUSTER_TILE_SIZE: u32 = 256;
pub const MAX_Z_SLICES: u32 = 256;

macro_rules! path_trace_settings {
    ($($(#[$attr:meta])* $name:ident: $ty:ty = $default:expr),+ $(,)?) => {
        /// Settings that affect the converged path traced image.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct PathTraceSettings {
            $($(#[$attr])* pub $name: $ty),+
        }

        impl Default for PathTraceSettings {
            fn default() -> Self {
                Self {
                    $($name: $default),+
                }
            }
        }

        impl PathTraceSettings {
            /// Names of the fields that differ between the two snapshots.
            pub fn changed_fields(&self, other: &Self) -> Vec<&'static str> {
                let mut changed = Vec::new();
                $(
                    if self.$name != other.$name {
                        changed.push(stringify!($name));
                    }
                )+
                changed
            }
        }
    };
}

path_trace_settings! {
    sqrt_num_samples: u32 = 4,
    max_path_length: u32 = 3,
    enable_albedo_maps: bool = true,
    enable_normal_maps: bool = true,
    enable_diffuse: bool = true,
    enable_specular: bool = true,
    enable_direct: bool = true,
    enable_indirect: bool = true,
    enable_indirect_specular: bool = true,
    enable_sky: bool = true,
    enable_sun: bool = true,
    render_lights: bool = false,
    /// Angular diameter in degrees.
    sun_size: f32 = 1.0,
    sun_direction: [f32; 3] = [0.26, 0.987, -0.16],
    turbidity: f32 = 2.0,
    ground_albedo: [f32; 3] = [0.25, 0.25, 0.25],
    roughness_scale: f32 = 1.0,
    metallic_scale: f32 = 1.0,
    enable_white_furnace_mode: bool = false,
    max_any_hit_path_length: u32 = 1,
    avoid_caustic_paths: bool = false,
    clamp_roughness: bool = false,
    apply_multiscattering_energy_compensation: bool = true,
}

impl PathTraceSettings {
    pub fn total_sample_count(&self) -> u32 {
        self.sqrt_num_samples * self.sqrt_num_samples
    }
}

/// Snapshot of every render setting for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    #[serde(flatten)]
    pub path_trace: PathTraceSettings,
    pub always_reset_path_trace: bool,
    pub enable_ray_tracing: bool,
    pub current_scene: SceneKind,
    pub max_light_clamp: u32,
    pub cluster_tile_size: u32,
    pub num_z_slices: u32,
    pub spot_light_range: f32,
    pub lightmap_resolution: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            path_trace: PathTraceSettings::default(),
            always_reset_path_trace: false,
            enable_ray_tracing: true,
            current_scene: SceneKind::BoxTest,
            max_light_clamp: MAX_SPOT_LIGHTS,
            cluster_tile_size: 16,
            num_z_slices: 16,
            spot_light_range: 7.5,
            lightmap_resolution: 4096,
        }
    }
}

impl RenderSettings {
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values that would leave a pass with no work items or overflow its sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("sqrt_num_samples", self.path_trace.sqrt_num_samples, MAX_SQRT_NUM_SAMPLES),
            ("cluster_tile_size", self.cluster_tile_size, MAX_CLUSTER_TILE_SIZE),
            ("num_z_slices", self.num_z_slices, MAX_Z_SLICES),
            ("lightmap_resolution", self.lightmap_resolution, MAX_LIGHTMAP_RESOLUTION),
        ];
        for &(name, value, max) in checks.iter() {
            if value < 1 || value > max {
                return Err(ConfigError::InvalidSetting {
                    name,
                    value,
                    min: 1,
                    max,
                });
            }
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn light_count(&self, available: usize) -> u32 {
        (available as u32).min(self.max_light_clamp).min(MAX_SPOT_LIGHTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_fields_lists_only_differences() {
        let a = PathTraceSettings::default();
        let mut b = a.clone();
        assert!(a.changed_fields(&b).is_empty());
        b.turbidity = 3.0;
        b.enable_sky = false;
        assert_eq!(a.changed_fields(&b), vec!["enable_sky", "turbidity"]);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings = RenderSettings::from_json(r#"{ "sqrt_num_samples": 8, "current_scene": "white-furnace" }"#).unwrap();
        assert_eq!(settings.path_trace.sqrt_num_samples, 8);
        assert_eq!(settings.path_trace.total_sample_count(), 64);
        assert_eq!(settings.current_scene, SceneKind::WhiteFurnace);
        assert_eq!(settings.num_z_slices, 16);

        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(RenderSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            (r#"{ "cluster_tile_size": 0 }"#, "cluster_tile_size", 0),
            (r#"{ "num_z_slices": 0 }"#, "num_z_slices", 0),
            (r#"{ "sqrt_num_samples": 0 }"#, "sqrt_num_samples", 0),
            (r#"{ "sqrt_num_samples": 65536 }"#, "sqrt_num_samples", 65536),
            (r#"{ "lightmap_resolution": 0 }"#, "lightmap_resolution", 0),
            (r#"{ "lightmap_resolution": 65536 }"#, "lightmap_resolution", 65536),
        ];
        for &(json, expected_name, expected_value) in cases.iter() {
            match RenderSettings::from_json(json) {
                Err(ConfigError::InvalidSetting { name, value, min, .. }) => {
                    assert_eq!(name, expected_name);
                    assert_eq!(value, expected_value);
                    assert_eq!(min, 1);
                }
                other => panic!("{} gave {:?}", json, other),
            }
        }

        let limits = format!(
            r#"{{ "sqrt_num_samples": {}, "lightmap_resolution": {}, "cluster_tile_size": 1, "num_z_slices": {} }}"#,
            MAX_SQRT_NUM_SAMPLES, MAX_LIGHTMAP_RESOLUTION, MAX_Z_SLICES
        );
        assert!(RenderSettings::from_json(&limits).is_ok());
        assert!(RenderSettings::default().validate().is_ok());
    }

    #[test]
    fn light_count_is_clamped() {
        let mut settings = RenderSettings::default();
        assert_eq!(settings.light_count(3), 3);
        assert_eq!(settings.light_count(100), MAX_SPOT_LIGHTS);
        settings.max_light_clamp = 2;
        assert_eq!(settings.light_count(3), 2);
        assert_eq!(SPOT_LIGHT_ELEMENTS_PER_CLUSTER, 1);
    }
}
