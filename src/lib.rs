// #![warn(missing_docs)]

//! Optical Bar Camera Geometry
//!
//! Models panoramic optical bar cameras, such as those flown on film-return
//! reconnaissance satellites, for photogrammetric processing. The model casts
//! world-frame rays from image pixels, projects world points back into the
//! image, and reads and writes the camera file format.

#[allow(missing_docs)]
pub mod error;

pub mod camera;
pub mod codec;
pub mod correction;
pub mod optical_bar;
pub mod orientation;
pub mod params;
pub mod solver;

pub mod prelude {
    pub use crate::{
        camera::{CameraModel, project_point},
        correction::{
            CorrectionError, apply_atmospheric_refraction_correction,
            apply_velocity_aberration_correction,
        },
        error::{Error, FormatError},
        optical_bar::OpticalBarModel,
        orientation::Orientation,
        params::{Corrections, OpticalBarParams, ScanDirection},
        solver::{LevenbergMarquardt, Objective, Solution, Termination},
    };
}
