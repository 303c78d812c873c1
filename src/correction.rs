//! Physical corrections applied to viewing rays in a geocentric frame.
//!
//! Both corrections take a unit ray leaving the camera center and return the
//! corrected unit ray. Distances are in meters and velocities in meters per
//! second.

use nalgebra::{Unit, UnitQuaternion, Vector3};
use std::f64::consts::FRAC_PI_2;
use thiserror::Error;

/// Speed of light in vacuum in meters per second.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Rotation rate of the Earth about its polar axis in radians per second.
pub const EARTH_ROTATION_RATE: f64 = 7.292_115e-5;

#[derive(Debug, Error, PartialEq)]
pub enum CorrectionError {
    #[error("camera center is {altitude} m from the reference sphere and must be above it")]
    BelowSurface { altitude: f64 },

    #[error("ray is not a finite, non-zero vector")]
    NonFinite,
}

/// Corrects `ray` for the bending of light through the atmosphere.
///
/// Uses the Saastamoinen model, which rotates the ray toward nadir by an
/// amount that grows with the tangent of the off-nadir angle. Rays pointing
/// straight down or at or above the horizon are returned unchanged.
pub fn apply_atmospheric_refraction_correction(
    camera_center: &Vector3<f64>,
    mean_earth_radius: f64,
    mean_surface_elevation: f64,
    ray: &Vector3<f64>,
) -> Result<Vector3<f64>, CorrectionError> {
    let ray = unit_ray(ray)?;
    let radius = camera_center.norm();
    let altitude = radius - mean_earth_radius;
    if !altitude.is_finite() || altitude <= mean_surface_elevation.max(0.0) {
        return Err(CorrectionError::BelowSurface { altitude });
    }

    let nadir = -camera_center / radius;
    let off_nadir = ray.dot(&nadir).clamp(-1.0, 1.0).acos();
    if off_nadir >= FRAC_PI_2 {
        return Ok(ray);
    }

    let Some(axis) = Unit::try_new(ray.cross(&nadir), f64::EPSILON) else {
        return Ok(ray);
    };

    let delta = saastamoinen_displacement(altitude, mean_surface_elevation, off_nadir);
    let corrected = UnitQuaternion::from_axis_angle(&axis, delta) * ray;
    Ok(corrected.normalize())
}

/// Angular displacement in radians between the refracted and straight paths.
fn saastamoinen_displacement(camera_altitude: f64, ground_altitude: f64, off_nadir: f64) -> f64 {
    // The model is expressed in kilometers.
    let big_h = camera_altitude / 1000.0;
    let h = ground_altitude / 1000.0;

    // Micro-radians.
    let k = 2316.0 * big_h / (big_h * big_h - 6.0 * big_h + 250.0)
        - 2316.0 * h * h / ((h * h - 6.0 * h + 250.0) * big_h);

    k * off_nadir.tan() * 1e-6
}

/// Corrects `ray` for the apparent shift caused by the camera's motion.
///
/// The motion that matters is relative to the ground point seen along `ray`,
/// so the Earth's rotation at that point is removed from `camera_velocity`.
/// If `ray` misses the mean sphere the camera velocity is used as is.
pub fn apply_velocity_aberration_correction(
    camera_center: &Vector3<f64>,
    camera_velocity: &Vector3<f64>,
    mean_earth_radius: f64,
    ray: &Vector3<f64>,
) -> Result<Vector3<f64>, CorrectionError> {
    let ray = unit_ray(ray)?;
    let altitude = camera_center.norm() - mean_earth_radius;
    if !altitude.is_finite() || altitude <= 0.0 {
        return Err(CorrectionError::BelowSurface { altitude });
    }

    let relative_velocity = match intersect_sphere(camera_center, &ray, mean_earth_radius) {
        Some(ground) => camera_velocity - surface_velocity(&ground),
        None => *camera_velocity,
    };

    unit_ray(&(ray - relative_velocity / SPEED_OF_LIGHT))
}

/// Velocity of a point fixed to the rotating Earth.
fn surface_velocity(point: &Vector3<f64>) -> Vector3<f64> {
    (Vector3::z() * EARTH_ROTATION_RATE).cross(point)
}

/// Returns the first point where `ray` from `origin` meets a sphere of
/// `radius` centered at the origin of the frame.
fn intersect_sphere(origin: &Vector3<f64>, ray: &Vector3<f64>, radius: f64) -> Option<Vector3<f64>> {
    let b = origin.dot(ray);
    let c = origin.norm_squared() - radius * radius;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }

    let t = -b - discriminant.sqrt();
    match t >= 0.0 {
        true => Some(origin + ray * t),
        false => None,
    }
}

fn unit_ray(ray: &Vector3<f64>) -> Result<Vector3<f64>, CorrectionError> {
    let norm = ray.norm();
    match norm.is_finite() && norm > 0.0 {
        true => Ok(ray / norm),
        false => Err(CorrectionError::NonFinite),
    }
}
