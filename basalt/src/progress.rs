use crate::camera::CameraPose;
use crate::maths::*;
use crate::settings::*;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulationState {
    Accumulating,
    Converged,
}

/// Why accumulation restarted this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    CameraMoved,
    SettingsChanged(Vec<&'static str>),
    AlwaysReset,
    SceneChanged,
    TargetResized,
}

/// Counts progressive samples, restarting whenever the camera or a tracked setting changes.
#[derive(Debug, Clone)]
pub struct ProgressivePathTraceState {
    sample_index: u32,
    target_sample_count: u32,
    last_pose: Option<CameraPose>,
    last_settings: Option<PathTraceSettings>,
    pending: Option<Invalidation>,
}

impl Default for ProgressivePathTraceState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressivePathTraceState {
    pub fn new() -> Self {
        Self {
            sample_index: 0,
            target_sample_count: 0,
            last_pose: None,
            last_settings: None,
            pending: None,
        }
    }

    pub fn sample_index(&self) -> u32 {
        self.sample_index
    }

    pub fn target_sample_count(&self) -> u32 {
        self.target_sample_count
    }

    pub fn state(&self) -> AccumulationState {
        if self.sample_index < self.target_sample_count {
            AccumulationState::Accumulating
        } else {
            AccumulationState::Converged
        }
    }

    pub fn is_converged(&self) -> bool {
        self.state() == AccumulationState::Converged
    }

    /// Restarts accumulation immediately for a reason the camera and settings cannot see,
    /// such as a recreated target. The reason is reported by the next `update`.
    pub fn invalidate(&mut self, reason: Invalidation) {
        self.sample_index = 0;
        self.pending = Some(reason);
    }

    /// Compares this frame's camera and settings against the previous frame, resetting the
    /// sample count on any difference. The snapshots are always replaced.
    pub fn update(
        &mut self,
        pose: CameraPose,
        settings: &RenderSettings,
        scene_changed: bool,
    ) -> Option<Invalidation> {
        let pending = self.pending.take();
        let invalidation = if scene_changed {
            Some(Invalidation::SceneChanged)
        } else if pending.is_some() {
            pending
        } else if settings.always_reset_path_trace {
            Some(Invalidation::AlwaysReset)
        } else if self.last_pose.map_or(false, |last| last != pose) {
            Some(Invalidation::CameraMoved)
        } else {
            self.last_settings
                .as_ref()
                .map(|last| last.changed_fields(&settings.path_trace))
                .filter(|changed| !changed.is_empty())
                .map(Invalidation::SettingsChanged)
        };

        if let Some(reason) = &invalidation {
            debug!("restarting accumulation: {:?}", reason);
            self.sample_index = 0;
        }
        self.target_sample_count = settings.path_trace.total_sample_count();
        self.last_pose = Some(pose);
        self.last_settings = Some(settings.path_trace.clone());
        invalidation
    }

    /// Returns the sample to dispatch this frame and advances, or `None` once converged.
    pub fn next_sample(&mut self) -> Option<u32> {
        match self.state() {
            AccumulationState::Accumulating => {
                let index = self.sample_index;
                self.sample_index += 1;
                Some(index)
            }
            AccumulationState::Converged => None,
        }
    }

    pub fn progress(&self) -> f32 {
        if self.target_sample_count == 0 {
            1.0
        } else {
            (self.sample_index as f32 / self.target_sample_count as f32).saturate()
        }
    }
}

/// Primary rays plus an extension ray and a shadow ray for each bounce after the first.
pub fn rays_per_frame(size: UVec2, max_path_length: u32) -> u64 {
    let pixels = (size.x as u64) * (size.y as u64);
    pixels * (1 + 2 * max_path_length.saturating_sub(1) as u64)
}

pub fn mega_rays_per_second(size: UVec2, max_path_length: u32, frame_time_ms: f32) -> f32 {
    if frame_time_ms <= 0.0 {
        return 0.0;
    }
    rays_per_frame(size, max_path_length) as f32 / (1000.0 * frame_time_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;

    fn settings(sqrt_num_samples: u32) -> RenderSettings {
        let mut settings = RenderSettings::default();
        settings.path_trace.sqrt_num_samples = sqrt_num_samples;
        settings
    }

    #[test]
    fn accumulates_until_converged() {
        let camera = Camera::new(Vec3::zero(), 0.1, 0.2, 1.5);
        let settings = settings(2);
        let mut state = ProgressivePathTraceState::new();

        let mut dispatched = Vec::new();
        for _ in 0..8 {
            assert_eq!(state.update(camera.pose(), &settings, false), None);
            dispatched.extend(state.next_sample());
        }
        assert_eq!(dispatched, vec![0, 1, 2, 3]);
        assert!(state.is_converged());
        assert_eq!(state.sample_index(), 4);
        assert_eq!(state.progress(), 1.0);
    }

    #[test]
    fn tiny_camera_motion_resets() {
        let mut camera = Camera::new(Vec3::zero(), 0.0, 0.0, 1.0);
        let settings = settings(4);
        let mut state = ProgressivePathTraceState::new();
        for _ in 0..5 {
            state.update(camera.pose(), &settings, false);
            state.next_sample();
        }
        assert_eq!(state.sample_index(), 5);

        camera.yaw += 1.0e-6;
        assert_eq!(state.update(camera.pose(), &settings, false), Some(Invalidation::CameraMoved));
        assert_eq!(state.sample_index(), 0);
        assert_eq!(state.next_sample(), Some(0));
    }

    #[test]
    fn converged_state_still_tracks_camera() {
        let mut camera = Camera::new(Vec3::zero(), 0.0, 0.0, 1.0);
        let settings = settings(1);
        let mut state = ProgressivePathTraceState::new();
        state.update(camera.pose(), &settings, false);
        assert_eq!(state.next_sample(), Some(0));
        for _ in 0..3 {
            state.update(camera.pose(), &settings, false);
            assert_eq!(state.next_sample(), None);
        }
        camera.position.x += 0.5;
        state.update(camera.pose(), &settings, false);
        assert_eq!(state.state(), AccumulationState::Accumulating);
    }

    #[test]
    fn tracked_setting_changes_reset_with_field_names() {
        let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 1.0);
        let mut settings = settings(4);
        let mut state = ProgressivePathTraceState::new();
        state.update(camera.pose(), &settings, false);
        state.next_sample();

        settings.spot_light_range = 3.0;
        assert_eq!(state.update(camera.pose(), &settings, false), None);
        state.next_sample();
        assert_eq!(state.sample_index(), 2);

        settings.path_trace.enable_sun = false;
        assert_eq!(
            state.update(camera.pose(), &settings, false),
            Some(Invalidation::SettingsChanged(vec!["enable_sun"]))
        );
        assert_eq!(state.sample_index(), 0);

        assert_eq!(state.update(camera.pose(), &settings, true), Some(Invalidation::SceneChanged));
        settings.always_reset_path_trace = true;
        state.next_sample();
        assert_eq!(state.update(camera.pose(), &settings, false), Some(Invalidation::AlwaysReset));
        assert_eq!(state.sample_index(), 0);
    }

    #[test]
    fn explicit_invalidation_restarts_converged_state() {
        let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 2.0);
        let settings = settings(1);
        let mut state = ProgressivePathTraceState::new();
        state.update(camera.pose(), &settings, false);
        assert_eq!(state.next_sample(), Some(0));
        state.update(camera.pose(), &settings, false);
        assert_eq!(state.next_sample(), None);

        state.invalidate(Invalidation::TargetResized);
        assert_eq!(state.sample_index(), 0);
        assert_eq!(state.update(camera.pose(), &settings, false), Some(Invalidation::TargetResized));
        assert_eq!(state.next_sample(), Some(0));
        assert_eq!(state.update(camera.pose(), &settings, false), None);

        // a scene change takes precedence and still clears the pending reason
        state.invalidate(Invalidation::TargetResized);
        assert_eq!(state.update(camera.pose(), &settings, true), Some(Invalidation::SceneChanged));
        assert_eq!(state.update(camera.pose(), &settings, false), None);
    }

    #[test]
    fn ray_counts() {
        let size = UVec2::new(100, 50);
        assert_eq!(rays_per_frame(size, 1), 5000);
        assert_eq!(rays_per_frame(size, 3), 25000);
        assert!((mega_rays_per_second(size, 3, 10.0) - 2.5).abs() < 1.0e-6);
        assert_eq!(mega_rays_per_second(size, 3, 0.0), 0.0);
    }
}
