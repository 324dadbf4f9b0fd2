use crate::maths::*;

/// First person camera. View space looks down +z with +y up, depth maps to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub fov_y: f32,
    pub aspect_ratio: f32,
    pub near_clip: f32,
    pub far_clip: f32,
}

/// Everything about a camera that affects the traced image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub orientation: Mat3,
    pub projection: Mat4,
}

impl Camera {
    pub fn new(position: Vec3, pitch: f32, yaw: f32, aspect_ratio: f32) -> Self {
        Self {
            position,
            pitch,
            yaw,
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect_ratio,
            near_clip: 0.01,
            far_clip: 100.0,
        }
    }

    pub fn forward(&self) -> Vec3 {
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        Vec3::new(sin_yaw * cos_pitch, -sin_pitch, cos_yaw * cos_pitch)
    }

    pub fn right(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        Vec3::new(cos_yaw, 0.0, -sin_yaw)
    }

    pub fn up(&self) -> Vec3 {
        self.forward().cross(self.right())
    }

    /// Columns are the world space right, up and forward axes.
    pub fn orientation(&self) -> Mat3 {
        Mat3::new(self.right(), self.up(), self.forward())
    }

    pub fn view_matrix(&self) -> Mat4 {
        let r = self.right();
        let u = self.up();
        let f = self.forward();
        let p = self.position;
        Mat4::new(
            Vec4::new(r.x, u.x, f.x, 0.0),
            Vec4::new(r.y, u.y, f.y, 0.0),
            Vec4::new(r.z, u.z, f.z, 0.0),
            Vec4::new(-r.dot(p), -u.dot(p), -f.dot(p), 1.0),
        )
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let y_scale = 1.0 / (0.5 * self.fov_y).tan();
        let x_scale = y_scale / self.aspect_ratio;
        let n = self.near_clip;
        let f = self.far_clip;
        Mat4::new(
            Vec4::new(x_scale, 0.0, 0.0, 0.0),
            Vec4::new(0.0, y_scale, 0.0, 0.0),
            Vec4::new(0.0, 0.0, f / (f - n), 1.0),
            Vec4::new(0.0, 0.0, -n * f / (f - n), 0.0),
        )
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn world_to_view(&self, p: Vec3) -> Vec3 {
        let d = p - self.position;
        Vec3::new(d.dot(self.right()), d.dot(self.up()), d.dot(self.forward()))
    }

    /// Projects a view space point with positive depth to normalized device coordinates.
    pub fn view_to_ndc(&self, v: Vec3) -> Vec3 {
        let clip = self.projection_matrix() * v.into_homogeneous_point();
        clip.xyz() / clip.w
    }

    pub fn pose(&self) -> CameraPose {
        CameraPose {
            position: self.position,
            orientation: self.orientation(),
            projection: self.projection_matrix(),
        }
    }

    /// Sphere that encloses the four corners of the near clip plane.
    pub fn near_clip_bounding_sphere(&self) -> (Vec3, f32) {
        let centre = self.position + self.near_clip * self.forward();
        let half_height = self.near_clip * (0.5 * self.fov_y).tan();
        let half_width = half_height * self.aspect_ratio;
        let top_right = centre + half_width * self.right() + half_height * self.up();
        (centre, (top_right - centre).mag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(a: Vec3, b: Vec3) {
        assert!((a - b).mag() < 1.0e-4, "{:?} != {:?}", a, b);
    }

    #[test]
    fn default_orientation_looks_down_z() {
        let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 1.0);
        assert_near(camera.forward(), Vec3::unit_z());
        assert_near(camera.right(), Vec3::unit_x());
        assert_near(camera.up(), Vec3::unit_y());
    }

    #[test]
    fn view_matrix_matches_world_to_view() {
        let camera = Camera::new(Vec3::new(1.0, 2.0, -3.0), 0.3, 1.2, 1.5);
        let p = Vec3::new(0.5, -1.0, 4.0);
        let via_matrix = (camera.view_matrix() * p.into_homogeneous_point()).xyz();
        assert_near(via_matrix, camera.world_to_view(p));
    }

    #[test]
    fn projection_maps_clip_planes_to_unit_depth() {
        let camera = Camera::new(Vec3::zero(), 0.0, 0.0, 16.0 / 9.0);
        let near = camera.view_to_ndc(Vec3::new(0.0, 0.0, camera.near_clip));
        let far = camera.view_to_ndc(Vec3::new(0.0, 0.0, camera.far_clip));
        assert!(near.z.abs() < 1.0e-4);
        assert!((far.z - 1.0).abs() < 1.0e-4);
    }

    #[test]
    fn near_sphere_touches_frustum_corner() {
        let camera = Camera::new(Vec3::new(0.0, 1.0, 0.0), 0.0, 0.0, 2.0);
        let (centre, radius) = camera.near_clip_bounding_sphere();
        let n = camera.near_clip;
        let half_height = n * (0.5 * camera.fov_y).tan();
        let corner = Vec3::new(2.0 * half_height, 1.0 + half_height, n);
        let ndc = camera.view_to_ndc(camera.world_to_view(corner));
        assert_near(ndc, Vec3::new(1.0, 1.0, 0.0));
        assert!(((corner - centre).mag() - radius).abs() < 1.0e-5);
    }
}
