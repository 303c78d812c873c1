use crate::{
    camera::{CameraModel, project_point},
    correction::{
        CorrectionError, apply_atmospheric_refraction_correction,
        apply_velocity_aberration_correction,
    },
    error::Error,
    orientation::Orientation,
    params::{Corrections, OpticalBarParams, ScanDirection},
    solver::LevenbergMarquardt,
};
use log::warn;
use nalgebra::{Rotation3, Vector2, Vector3};
use rayon::prelude::*;
use std::fmt;

/// Geometry of a panoramic optical bar camera on a moving platform.
///
/// The optical bar sweeps across the image columns at a constant angular
/// rate while the platform moves at constant velocity, so every column is
/// exposed from a different camera center. Rows within a column are exposed
/// at the same instant. The camera attitude is held constant over the scan.
#[derive(Clone, Debug, PartialEq)]
pub struct OpticalBarModel {
    params: OpticalBarParams,
}

impl OpticalBarModel {
    /// Creates a new `OpticalBarModel` from validated `params`.
    pub fn new(params: OpticalBarParams) -> Result<Self, Error> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Returns the model with the ray corrections replaced by `corrections`.
    pub fn with_corrections(mut self, corrections: Corrections) -> Self {
        self.params.corrections = corrections;
        self
    }

    pub fn params(&self) -> &OpticalBarParams {
        &self.params
    }

    pub fn into_params(self) -> OpticalBarParams {
        self.params
    }

    pub fn image_size(&self) -> (u32, u32) {
        self.params.image_size
    }

    pub fn image_center(&self) -> Vector2<f64> {
        self.params.image_center
    }

    pub fn pixel_pitch(&self) -> f64 {
        self.params.pixel_pitch
    }

    pub fn focal_length(&self) -> f64 {
        self.params.focal_length
    }

    pub fn scan_angle(&self) -> f64 {
        self.params.scan_angle
    }

    pub fn scan_rate(&self) -> f64 {
        self.params.scan_rate
    }

    pub fn scan_direction(&self) -> ScanDirection {
        self.params.scan_direction
    }

    pub fn forward_tilt(&self) -> f64 {
        self.params.forward_tilt
    }

    pub fn speed(&self) -> f64 {
        self.params.speed
    }

    pub fn mean_earth_radius(&self) -> f64 {
        self.params.mean_earth_radius
    }

    pub fn mean_surface_elevation(&self) -> f64 {
        self.params.mean_surface_elevation
    }

    pub fn motion_compensation(&self) -> bool {
        self.params.motion_compensation
    }

    pub fn corrections(&self) -> Corrections {
        self.params.corrections
    }

    /// Camera center at the start of the scan.
    pub fn initial_position(&self) -> Vector3<f64> {
        self.params.initial_position
    }

    pub fn initial_orientation(&self) -> Orientation {
        self.params.initial_orientation
    }

    /// Moves the camera center at the start of the scan.
    ///
    /// Fails without changing the model if `position` is not finite.
    pub fn set_camera_center(&mut self, position: Vector3<f64>) -> Result<(), Error> {
        finite_vector("initial_position", &position)?;
        self.params.initial_position = position;
        Ok(())
    }

    /// Fails without changing the model if `orientation` is not finite.
    pub fn set_camera_pose(&mut self, orientation: Orientation) -> Result<(), Error> {
        finite_vector("initial_orientation", &orientation.axis_angle())?;
        self.params.initial_orientation = orientation;
        Ok(())
    }

    /// Time in seconds taken by one sweep across the image.
    pub fn scan_duration(&self) -> f64 {
        self.params.scan_angle / self.params.scan_rate
    }

    /// Maps `pixel` to a physical offset from the principal point on the
    /// sensor plane.
    pub fn sensor_plane_projection(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        (pixel - self.params.image_center) * self.params.pixel_pitch
    }

    /// Time elapsed between the start of the scan and the exposure of `pixel`.
    ///
    /// Only the column matters since a whole column is exposed at once.
    pub fn scan_time_offset(&self, pixel: &Vector2<f64>) -> f64 {
        let max_col = (self.params.image_size.0 - 1) as f64;
        let scan_fraction = match self.params.scan_direction {
            ScanDirection::LeftToRight => pixel.x / max_col,
            ScanDirection::RightToLeft => (max_col - pixel.x) / max_col,
        };

        scan_fraction * self.scan_duration()
    }

    /// Velocity of the camera in the world frame when `pixel` was exposed.
    pub fn instantaneous_velocity(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        // Recover the platform motion relative to the tilted camera.
        let tilt = Rotation3::from_axis_angle(&Vector3::x_axis(), -self.params.forward_tilt);
        let sensor_velocity = tilt * Vector3::new(0.0, self.params.speed, 0.0);

        self.orientation(pixel).rotate(&sensor_velocity)
    }

    /// Camera center in the world frame when `pixel` was exposed.
    pub fn instantaneous_position(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        self.params.initial_position
            + self.scan_time_offset(pixel) * self.instantaneous_velocity(pixel)
    }

    /// Camera attitude when `pixel` was exposed, which is the same for the
    /// whole scan.
    pub fn orientation(&self, _pixel: &Vector2<f64>) -> Orientation {
        self.params.initial_orientation
    }

    /// Casts the unit world-frame ray through `pixel` without any correction.
    pub fn pixel_to_ray_uncorrected(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        let sensor_plane = self.sensor_plane_projection(pixel);
        let center = self.instantaneous_position(pixel);
        let focal_length = self.params.focal_length;

        // Horizontal angle away from the optical axis.
        let alpha = sensor_plane.x / focal_length;

        // Height above the mean surface.
        let height = center.norm()
            - (self.params.mean_surface_elevation + self.params.mean_earth_radius);

        // The film was translated under the lens during the exposure to
        // compensate for the forward motion of the platform.
        let compensation = match self.params.motion_compensation {
            true => {
                self.params.scan_direction.sign()
                    * (focal_length * self.params.speed / (height * self.params.scan_rate))
                    * alpha.sin()
            }
            false => 0.0,
        };

        let ray = Vector3::new(
            focal_length * alpha.sin(),
            sensor_plane.y + compensation,
            focal_length * alpha.cos(),
        )
        .normalize();

        self.orientation(pixel).rotate(&ray)
    }

    /// Casts the unit world-frame ray through `pixel`.
    ///
    /// The enabled [`Corrections`] are applied in order: atmospheric
    /// refraction, then velocity aberration.
    pub fn pixel_to_ray(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>, Error> {
        self.corrected_ray(pixel).map_err(|source| Error::PixelToRay {
            pixel: [pixel.x, pixel.y],
            source,
        })
    }

    fn corrected_ray(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>, CorrectionError> {
        let mut ray = self.pixel_to_ray_uncorrected(pixel);
        let center = self.instantaneous_position(pixel);
        let corrections = self.params.corrections;

        if corrections.atmospheric_refraction {
            ray = apply_atmospheric_refraction_correction(
                &center,
                self.params.mean_earth_radius,
                self.params.mean_surface_elevation,
                &ray,
            )?;
        }

        if corrections.velocity_aberration {
            ray = apply_velocity_aberration_correction(
                &center,
                &self.instantaneous_velocity(pixel),
                self.params.mean_earth_radius,
                &ray,
            )?;
        }

        match ray.iter().all(|value| value.is_finite()) {
            true => Ok(ray),
            false => Err(CorrectionError::NonFinite),
        }
    }

    /// Casts rays through all `pixels` in parallel.
    pub fn par_pixels_to_rays(&self, pixels: &[Vector2<f64>]) -> Vec<Result<Vector3<f64>, Error>> {
        pixels
            .par_iter()
            .map(|pixel| self.pixel_to_ray(pixel))
            .collect()
    }

    /// Finds the pixel that sees `point`.
    pub fn point_to_pixel(&self, point: &Vector3<f64>) -> Result<Vector2<f64>, Error> {
        self.point_to_pixel_with(point, &LevenbergMarquardt::default())
    }

    /// Finds the pixel that sees `point` using a custom `solver` configuration.
    ///
    /// The search starts from the middle of the image. A solution more than
    /// one image width or height outside the image is rejected, since no
    /// exposed pixel sees the point.
    pub fn point_to_pixel_with(
        &self,
        point: &Vector3<f64>,
        solver: &LevenbergMarquardt,
    ) -> Result<Vector2<f64>, Error> {
        let (width, height) = self.params.image_size;
        let (width, height) = (width as f64, height as f64);
        let start = Vector2::new(width, height) / 2.0;
        let pixel = project_point(self, point, &start, solver)?;

        let within = |value: f64, size: f64| (-size..=2.0 * size).contains(&value);
        match within(pixel.x, width) && within(pixel.y, height) {
            true => Ok(pixel),
            false => {
                warn!("solved pixel ({}, {}) lies far outside the image", pixel.x, pixel.y);
                Err(Error::PointToPixel {
                    point: [point.x, point.y, point.z],
                    reason: format!(
                        "pixel ({}, {}) is more than one image size outside the image",
                        pixel.x, pixel.y
                    ),
                })
            }
        }
    }

    /// Moves the camera into another world frame.
    ///
    /// The initial position becomes `scale * rotation * position + translation`
    /// and `rotation` is composed onto the orientation. Nothing else changes.
    /// Fails without changing the model if the result is not finite.
    pub fn apply_transform(
        &mut self,
        rotation: &Rotation3<f64>,
        translation: &Vector3<f64>,
        scale: f64,
    ) -> Result<(), Error> {
        let position = scale * (rotation * self.params.initial_position) + translation;
        let pose = Orientation::from_rotation(rotation) * self.params.initial_orientation;

        finite_vector("initial_orientation", &pose.axis_angle())?;
        self.set_camera_center(position)?;
        self.set_camera_pose(pose)
    }
}

fn finite_vector(name: &'static str, vector: &Vector3<f64>) -> Result<(), Error> {
    match vector.iter().all(|value| value.is_finite()) {
        true => Ok(()),
        false => Err(Error::InvalidParameter {
            name,
            reason: format!("expected finite values, got {vector:?}"),
        }),
    }
}

impl TryFrom<OpticalBarParams> for OpticalBarModel {
    type Error = Error;

    fn try_from(params: OpticalBarParams) -> Result<Self, Self::Error> {
        Self::new(params)
    }
}

impl CameraModel for OpticalBarModel {
    fn pixel_to_ray(&self, pixel: &Vector2<f64>) -> Result<Vector3<f64>, Error> {
        OpticalBarModel::pixel_to_ray(self, pixel)
    }

    fn camera_center(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        self.instantaneous_position(pixel)
    }
}

impl fmt::Display for OpticalBarModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.params;
        let position = p.initial_position;
        let pose = p.initial_orientation.axis_angle();

        writeln!(f, "Optical bar model")?;
        writeln!(f, "  image size:             {} x {}", p.image_size.0, p.image_size.1)?;
        writeln!(
            f,
            "  image center (px):      {}, {}",
            p.image_center.x, p.image_center.y
        )?;
        writeln!(f, "  pixel pitch (m):        {}", p.pixel_pitch)?;
        writeln!(f, "  focal length (m):       {}", p.focal_length)?;
        writeln!(f, "  scan angle (rad):       {}", p.scan_angle)?;
        writeln!(f, "  scan rate (rad/s):      {}", p.scan_rate)?;
        writeln!(f, "  scan direction:         {:?}", p.scan_direction)?;
        writeln!(f, "  forward tilt (rad):     {}", p.forward_tilt)?;
        writeln!(
            f,
            "  initial position:       {}, {}, {}",
            position.x, position.y, position.z
        )?;
        writeln!(f, "  initial pose:           {}, {}, {}", pose.x, pose.y, pose.z)?;
        writeln!(f, "  speed (m/s):            {}", p.speed)?;
        writeln!(f, "  mean earth radius:      {}", p.mean_earth_radius)?;
        writeln!(f, "  mean surface elevation: {}", p.mean_surface_elevation)?;
        writeln!(f, "  motion compensation:    {}", p.motion_compensation)?;
        writeln!(
            f,
            "  corrections:            refraction={}, aberration={}",
            p.corrections.atmospheric_refraction, p.corrections.velocity_aberration
        )
    }
}
