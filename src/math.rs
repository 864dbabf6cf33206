//! Vector and matrix helpers.
//!
//! Everything here is built on `cgmath` and uses one set of conventions:
//!
//! - matrices are column-major and act on column vectors (`M * v`)
//! - `a.cross(b)` follows the right-hand rule
//! - camera space is +x right, +y up, +z forward, and [`perspective`] maps
//!   view depth `near..far` onto clip depth `0..1` (the wgpu range)
//! - compound Euler rotations are always `Rx * Ry * Rz`
//!
//! Callers build matrices through these functions instead of filling raw
//! float arrays themselves.

use cgmath::{InnerSpace, Matrix, Matrix4, Rad, Vector3, Vector4, Zero};

/// One of the three principal axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// A position in homogeneous coordinates (`w = 1`).
pub fn point(v: Vector3<f32>) -> Vector4<f32> {
    v.extend(1.0)
}

/// A direction in homogeneous coordinates (`w = 0`), unaffected by translation.
pub fn direction(v: Vector3<f32>) -> Vector4<f32> {
    v.extend(0.0)
}

pub fn dot(a: Vector3<f32>, b: Vector3<f32>) -> f32 {
    a.dot(b)
}

pub fn cross(a: Vector3<f32>, b: Vector3<f32>) -> Vector3<f32> {
    a.cross(b)
}

/// Normalizes `v`, returning the zero vector unchanged.
///
/// `cgmath`'s own `normalize` divides by the magnitude and yields NaNs for
/// zero-length input, which degenerate triangles produce regularly.
pub fn normalize(v: Vector3<f32>) -> Vector3<f32> {
    let length = v.magnitude();
    if length == 0.0 || !length.is_finite() {
        return Vector3::zero();
    }
    v / length
}

/// Rotation by `angle` about a single principal axis.
pub fn rotation(angle: Rad<f32>, axis: Axis) -> Matrix4<f32> {
    match axis {
        Axis::X => Matrix4::from_angle_x(angle),
        Axis::Y => Matrix4::from_angle_y(angle),
        Axis::Z => Matrix4::from_angle_z(angle),
    }
}

/// Euler rotation composed as `Rx(x) * Ry(y) * Rz(z)`.
///
/// Applied to a vector this rotates about Z first, then Y, then X.
pub fn euler_rotation(angles: Vector3<f32>) -> Matrix4<f32> {
    multiply(
        rotation(Rad(angles.x), Axis::X),
        multiply(
            rotation(Rad(angles.y), Axis::Y),
            rotation(Rad(angles.z), Axis::Z),
        ),
    )
}

pub fn translation(offset: Vector3<f32>) -> Matrix4<f32> {
    Matrix4::from_translation(offset)
}

pub fn scale(factors: Vector3<f32>) -> Matrix4<f32> {
    Matrix4::from_nonuniform_scale(factors.x, factors.y, factors.z)
}

/// `a * b`: a point transformed by the result is transformed by `b` first.
pub fn multiply(a: Matrix4<f32>, b: Matrix4<f32>) -> Matrix4<f32> {
    a * b
}

pub fn transpose(m: Matrix4<f32>) -> Matrix4<f32> {
    m.transpose()
}

/// Applies `m` to a homogeneous vector. Directions (`w = 0`) keep `w = 0`
/// for any affine `m`.
pub fn transform(m: Matrix4<f32>, v: Vector4<f32>) -> Vector4<f32> {
    m * v
}

/// Symmetric-frustum perspective projection for a +z-forward camera.
///
/// View depth `near` lands on clip depth 0 and `far` on clip depth 1 after
/// the perspective divide.
pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let f = 1.0 / (fov_y_degrees.to_radians() / 2.0).tan();
    let depth = far / (far - near);
    // cgmath::Matrix4::new takes columns
    Matrix4::new(
        f / aspect, 0.0, 0.0, 0.0,
        0.0, f, 0.0, 0.0,
        0.0, 0.0, depth, 1.0,
        0.0, 0.0, -near * depth, 0.0,
    )
}

/// Flattens a matrix column by column for uniform upload.
pub fn to_columns(m: Matrix4<f32>) -> [[f32; 4]; 4] {
    m.into()
}
