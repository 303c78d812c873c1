use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest deviation from orthonormality accepted by [`Orientation::from_matrix`].
const MATRIX_TOLERANCE: f64 = 1e-3;

/// Describes the attitude of a camera with respect to the world frame.
///
/// An `Orientation` maps vectors from the camera frame into the world frame.
/// The canonical representation is an axis-angle vector whose direction is
/// the rotation axis and whose length is the rotation angle in radians.
/// Quaternions and matrices are derived from it on demand.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Orientation {
    axis_angle: Vector3<f64>,
}

impl Orientation {
    /// Creates an `Orientation` that leaves vectors unchanged.
    pub fn identity() -> Self {
        Self {
            axis_angle: Vector3::zeros(),
        }
    }

    /// Creates a new `Orientation` from an axis-angle vector.
    pub fn from_axis_angle(axis_angle: Vector3<f64>) -> Self {
        Self { axis_angle }
    }

    pub fn from_quaternion(quaternion: &UnitQuaternion<f64>) -> Self {
        Self::from_axis_angle(scaled_axis(quaternion))
    }

    pub fn from_rotation(rotation: &Rotation3<f64>) -> Self {
        Self::from_quaternion(&UnitQuaternion::from_rotation_matrix(rotation))
    }

    /// Creates a new `Orientation` from a 3x3 rotation matrix.
    ///
    /// Returns `None` if `matrix` has non-finite entries, is not orthonormal,
    /// or is a reflection. Small numerical deviations are absorbed by
    /// renormalizing the recovered quaternion.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Option<Self> {
        if matrix.iter().any(|value| !value.is_finite()) {
            return None;
        }

        let gram_error = (matrix.transpose() * matrix - Matrix3::identity()).amax();
        if gram_error > MATRIX_TOLERANCE || (matrix.determinant() - 1.0).abs() > MATRIX_TOLERANCE {
            return None;
        }

        let quaternion =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*matrix));
        Some(Self::from_quaternion(&UnitQuaternion::new_normalize(
            quaternion.into_inner(),
        )))
    }

    pub fn axis_angle(&self) -> Vector3<f64> {
        self.axis_angle
    }

    /// Rotation angle in radians on the range 0 to PI.
    pub fn angle(&self) -> f64 {
        self.quaternion().angle()
    }

    pub fn quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_scaled_axis(self.axis_angle)
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        self.quaternion().to_rotation_matrix()
    }

    /// Returns the orthonormal matrix that maps camera vectors into the world.
    pub fn matrix(&self) -> Matrix3<f64> {
        self.rotation().into_inner()
    }

    /// Rotates `vector` from the camera frame into the world frame.
    pub fn rotate(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.quaternion() * vector
    }

    pub fn inverse(&self) -> Self {
        Self::from_axis_angle(-self.axis_angle)
    }
}

/// Recovers the axis-angle vector of `quaternion`.
///
/// Uses `atan2` on the half angle so that small rotations keep full precision.
fn scaled_axis(quaternion: &UnitQuaternion<f64>) -> Vector3<f64> {
    let q = quaternion.quaternion();
    let (w, imag) = match q.w < 0.0 {
        true => (-q.w, -q.imag()),
        false => (q.w, q.imag()),
    };

    let sin_half = imag.norm();
    if sin_half == 0.0 {
        return Vector3::zeros();
    }

    imag * (2.0 * sin_half.atan2(w) / sin_half)
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}

/// Composes two orientations so that `(a * b).rotate(v) == a.rotate(&b.rotate(v))`.
impl std::ops::Mul for Orientation {
    type Output = Self;

    fn mul(self, other: Self) -> Self::Output {
        Self::from_quaternion(&(self.quaternion() * other.quaternion()))
    }
}
