use crate::{
    error::Error,
    solver::{LevenbergMarquardt, Objective},
};
use log::warn;
use nalgebra::{DVector, Vector2, Vector3, dvector};

/// Largest misalignment, in radians, between the ray cast from a solved pixel
/// and the direction to the point it should see.
const MAX_RAY_MISALIGNMENT: f64 = 1e-6;

/// A camera that casts world-frame rays from image pixels.
///
/// Cameras whose center moves during the exposure report a different
/// `camera_center` for each pixel.
pub trait CameraModel {
    /// Returns the unit ray leaving the camera through `pixel`.
    fn pixel_to_ray(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>, Error>;

    /// Returns the position of the camera when `pixel` was exposed.
    fn camera_center(&self, pixel: &Vector2<f64>) -> Vector3<f64>;
}

/// Measures how far the ray cast from a candidate pixel points away from a
/// fixed world point.
///
/// The residual is the difference between the pixel's ray and the unit
/// direction from the pixel's camera center to the point. It vanishes at the
/// pixel that sees the point.
pub struct PointProjection<'a, C: ?Sized> {
    camera: &'a C,
    point: Vector3<f64>,
}

impl<'a, C: CameraModel + ?Sized> PointProjection<'a, C> {
    pub fn new(camera: &'a C, point: Vector3<f64>) -> Self {
        Self { camera, point }
    }
}

impl<C: CameraModel + ?Sized> Objective for PointProjection<'_, C> {
    type Error = Error;

    fn residual(&self, x: &DVector<f64>) -> Result<DVector<f64>, Self::Error> {
        let pixel = Vector2::new(x[0], x[1]);
        let ray = self.camera.pixel_to_ray(&pixel)?;
        let direction = (self.point - self.camera.camera_center(&pixel)).normalize();
        let r = ray - direction;
        Ok(dvector![r.x, r.y, r.z])
    }
}

/// Finds the pixel of `camera` whose ray passes through `point`.
///
/// Fails if the solver does not converge or if the best pixel it finds does
/// not actually look at `point`, which happens when the point is not visible
/// to the camera, for example when it lies behind it.
pub fn project_point<C: CameraModel + ?Sized>(
    camera: &C,
    point: &Vector3<f64>,
    initial: &Vector2<f64>,
    solver: &LevenbergMarquardt,
) -> Result<Vector2<f64>, Error> {
    let failure = |reason: String| Error::PointToPixel {
        point: [point.x, point.y, point.z],
        reason,
    };

    let objective = PointProjection::new(camera, *point);
    let solution = solver
        .minimize(&objective, dvector![initial.x, initial.y])
        .map_err(|err| failure(err.to_string()))?;

    if !solution.termination.converged() {
        return Err(failure(format!(
            "solver did not converge ({:?}, status {})",
            solution.termination,
            solution.termination.status()
        )));
    }

    let pixel = Vector2::new(solution.x[0], solution.x[1]);
    if !pixel.iter().all(|value| value.is_finite()) {
        return Err(failure("solver returned a non-finite pixel".into()));
    }

    if solution.residual_norm > MAX_RAY_MISALIGNMENT {
        warn!(
            "closest pixel ({}, {}) misses the point by {:e} rad",
            pixel.x, pixel.y, solution.residual_norm
        );
        return Err(failure(format!(
            "no pixel sees the point, closest ray is off by {:e} rad",
            solution.residual_norm
        )));
    }

    Ok(pixel)
}
