use crate::{error::Error, orientation::Orientation};
use nalgebra::{Vector2, Vector3};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Direction in which the optical bar sweeps across the image columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScanDirection {
    /// Column zero is exposed first.
    #[default]
    LeftToRight,

    /// The last column is exposed first.
    RightToLeft,
}

impl ScanDirection {
    /// Returns `1.0` for left-to-right scans and `-1.0` otherwise.
    pub fn sign(self) -> f64 {
        match self {
            ScanDirection::LeftToRight => 1.0,
            ScanDirection::RightToLeft => -1.0,
        }
    }
}

/// Selects the physical corrections applied to every cast ray.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Corrections {
    /// Apply the atmospheric refraction correction when `true`.
    pub atmospheric_refraction: bool,

    /// Apply the velocity aberration correction when `true`.
    pub velocity_aberration: bool,
}

impl Corrections {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            atmospheric_refraction: true,
            velocity_aberration: true,
        }
    }
}

/// The full parameter set of an optical bar camera.
///
/// Lengths are in meters, angles in radians, and times in seconds. Positions
/// and velocities are expressed in the world frame, usually geocentric.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OpticalBarParams {
    /// Image width and height in pixels.
    pub image_size: (u32, u32),

    /// Location of the principal point in pixels.
    pub image_center: Vector2<f64>,

    /// Physical size of a pixel.
    pub pixel_pitch: f64,
    pub focal_length: f64,

    /// Angle swept by the optical bar over one image.
    pub scan_angle: f64,

    /// Angular rate of the optical bar in radians per second.
    pub scan_rate: f64,
    pub scan_direction: ScanDirection,

    /// Tilt of the camera toward the direction of motion.
    pub forward_tilt: f64,

    /// Camera position at the start of the scan.
    pub initial_position: Vector3<f64>,

    /// Camera attitude, constant over the scan.
    pub initial_orientation: Orientation,

    /// Platform speed along the sensor's along-track axis.
    pub speed: f64,
    pub mean_earth_radius: f64,
    pub mean_surface_elevation: f64,

    /// Model the film shift that compensated for forward motion.
    pub motion_compensation: bool,

    #[cfg_attr(feature = "serde", serde(default))]
    pub corrections: Corrections,
}

impl OpticalBarParams {
    /// Checks that the parameters describe a physically valid camera.
    pub fn validate(&self) -> Result<(), Error> {
        let (width, height) = self.image_size;
        if width < 2 {
            return Err(invalid("image_size", format!("width must be at least 2, got {width}")));
        }
        if height < 1 {
            return Err(invalid("image_size", "height must be at least 1".into()));
        }

        positive("pixel_pitch", self.pixel_pitch)?;
        positive("focal_length", self.focal_length)?;
        positive("scan_rate", self.scan_rate)?;

        for (name, value) in [
            ("image_center", self.image_center.x),
            ("image_center", self.image_center.y),
            ("scan_angle", self.scan_angle),
            ("forward_tilt", self.forward_tilt),
            ("initial_position", self.initial_position.x),
            ("initial_position", self.initial_position.y),
            ("initial_position", self.initial_position.z),
            ("initial_orientation", self.initial_orientation.axis_angle().x),
            ("initial_orientation", self.initial_orientation.axis_angle().y),
            ("initial_orientation", self.initial_orientation.axis_angle().z),
            ("speed", self.speed),
            ("mean_earth_radius", self.mean_earth_radius),
            ("mean_surface_elevation", self.mean_surface_elevation),
        ] {
            finite(name, value)?;
        }

        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> Error {
    Error::InvalidParameter { name, reason }
}

fn finite(name: &'static str, value: f64) -> Result<(), Error> {
    match value.is_finite() {
        true => Ok(()),
        false => Err(invalid(name, format!("expected a finite value, got {value}"))),
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), Error> {
    finite(name, value)?;
    match value > 0.0 {
        true => Ok(()),
        false => Err(invalid(name, format!("expected a positive value, got {value}"))),
    }
}
