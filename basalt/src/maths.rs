use bytemuck::{Pod, Zeroable};
pub use ultraviolet as uv;

pub type Vec2 = uv::Vec2;
pub type UVec2 = uv::UVec2;

pub type Vec3 = uv::Vec3;
pub type Vec4 = uv::Vec4;

pub type Mat3 = uv::Mat3;
pub type Mat4 = uv::Mat4;

pub trait AsFloat {
    type Output;
    fn as_float(&self) -> Self::Output;
}

impl AsFloat for UVec2 {
    type Output = Vec2;
    fn as_float(&self) -> Self::Output {
        Vec2::new(self.x as f32, self.y as f32)
    }
}

pub trait DivRoundUp {
    fn div_round_up(&self, divisor: u32) -> Self;
}

impl DivRoundUp for u32 {
    fn div_round_up(&self, divisor: u32) -> Self {
        (*self + divisor - 1) / divisor
    }
}

impl DivRoundUp for UVec2 {
    fn div_round_up(&self, divisor: u32) -> Self {
        (*self + Self::broadcast(divisor - 1)) / divisor
    }
}

pub trait Saturate {
    fn saturate(self) -> Self;
}

impl Saturate for f32 {
    fn saturate(self) -> Self {
        self.max(0.0).min(1.0)
    }
}

pub fn align_up(n: u32, a: u32) -> u32 {
    (n + a - 1) & !(a - 1)
}

/// Orthonormal basis whose third column is `dir`.
pub fn basis_from_direction(dir: Vec3) -> Mat3 {
    let dir = dir.normalized();
    let helper = if dir.y.abs() < 0.999 { Vec3::unit_y() } else { Vec3::unit_x() };
    let tangent = helper.cross(dir).normalized();
    let bitangent = dir.cross(tangent);
    Mat3::new(tangent, bitangent, dir)
}

/// Row-major 3x4 affine transform, as consumed by acceleration structure instances.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct TransposedTransform3(pub [Vec4; 3]);

impl TransposedTransform3 {
    pub fn identity() -> Self {
        Self([
            Vec4::new(1.0, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 1.0, 0.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 0.0),
        ])
    }
}
