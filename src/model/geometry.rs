//! World-space geometry and camera bounds.
//!
//! Every coordinate entering a ledger passes through `validate`. Values are
//! rejected, never coerced: a NaN or an off-canvas coordinate is a caller bug.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Absolute bound on world-space coordinates, both axes.
pub const WORLD_BOUND: f64 = 1e6;
/// Largest width or height an entity may have.
pub const MAX_EXTENT: f64 = 1e6;
pub const MIN_ZOOM: f64 = 0.05;
pub const MAX_ZOOM: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn validate(&self, what: &str) -> Result<()> {
        check_coordinate(what, "x", self.x)?;
        check_coordinate(what, "y", self.y)
    }

    /// Clamp into the world bounds. Non-finite values are still an error.
    pub fn normalized(&self, what: &str) -> Result<Self> {
        Ok(Self {
            x: clamp_finite(what, "x", self.x, -WORLD_BOUND, WORLD_BOUND)?,
            y: clamp_finite(what, "y", self.y, -WORLD_BOUND, WORLD_BOUND)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub w: f64,
    pub h: f64,
}

impl Size {
    pub const fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }

    pub fn validate(&self, what: &str) -> Result<()> {
        check_extent(what, "w", self.w)?;
        check_extent(what, "h", self.h)
    }

    pub fn normalized(&self, what: &str) -> Result<Self> {
        self.validate(what)?;
        Ok(*self)
    }
}

/// Pan/zoom transform of a workspace view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    pub translate_x: f64,
    pub translate_y: f64,
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            translate_x: 0.0,
            translate_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Camera {
    pub fn validate(&self) -> Result<()> {
        check_coordinate("camera", "translateX", self.translate_x)?;
        check_coordinate("camera", "translateY", self.translate_y)?;
        if !self.zoom.is_finite() || !(MIN_ZOOM..=MAX_ZOOM).contains(&self.zoom) {
            return Err(Error::Validation(format!(
                "camera zoom {} outside [{MIN_ZOOM}, {MAX_ZOOM}]",
                self.zoom
            )));
        }
        Ok(())
    }

    pub fn normalized(&self) -> Result<Self> {
        Ok(Self {
            translate_x: clamp_finite(
                "camera",
                "translateX",
                self.translate_x,
                -WORLD_BOUND,
                WORLD_BOUND,
            )?,
            translate_y: clamp_finite(
                "camera",
                "translateY",
                self.translate_y,
                -WORLD_BOUND,
                WORLD_BOUND,
            )?,
            zoom: clamp_finite("camera", "zoom", self.zoom, MIN_ZOOM, MAX_ZOOM)?,
        })
    }
}

fn check_coordinate(what: &str, field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::Validation(format!("{what}.{field} is not finite ({value})")));
    }
    if value.abs() > WORLD_BOUND {
        return Err(Error::Validation(format!(
            "{what}.{field} = {value} outside world bounds ±{WORLD_BOUND}"
        )));
    }
    Ok(())
}

fn check_extent(what: &str, field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > MAX_EXTENT {
        return Err(Error::Validation(format!(
            "{what}.{field} = {value} must be finite and in (0, {MAX_EXTENT}]"
        )));
    }
    Ok(())
}

fn clamp_finite(what: &str, field: &str, value: f64, min: f64, max: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(Error::Validation(format!("{what}.{field} is not finite ({value})")));
    }
    Ok(value.clamp(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_coordinate_is_rejected() {
        let err = Point::new(f64::NAN, 10.0).validate("panel").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn out_of_range_is_rejected_not_clamped() {
        assert!(Point::new(2e6, 0.0).validate("panel").is_err());
        assert!(Point::new(-1e6, 1e6).validate("panel").is_ok());
    }

    #[test]
    fn normalization_clamps_but_rejects_infinity() {
        let p = Point::new(5e6, -5e6).normalized("panel").unwrap();
        assert_eq!(p, Point::new(WORLD_BOUND, -WORLD_BOUND));
        assert!(Point::new(f64::INFINITY, 0.0).normalized("panel").is_err());
    }

    #[test]
    fn sizes_must_be_positive() {
        assert!(Size::new(0.0, 10.0).validate("component").is_err());
        assert!(Size::new(10.0, -1.0).validate("component").is_err());
        assert!(Size::new(320.0, 240.0).validate("component").is_ok());
    }

    #[test]
    fn zoom_is_bounded() {
        let mut camera = Camera::default();
        assert!(camera.validate().is_ok());
        camera.zoom = 0.0;
        assert!(camera.validate().is_err());
        camera.zoom = 40.0;
        assert!(camera.validate().is_err());
        assert_eq!(camera.normalized().unwrap().zoom, MAX_ZOOM);
    }
}
