//! Utility types shared across the crate.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`Aabb`] - bounding box over `glam::Vec3`

mod error;
mod math;

pub use error::*;
pub use math::*;
