//! Extrusion paths handed to G-code generation.

use std::f64::consts::TAU;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlicerError};

/// Stable identity of one extrusion entity within a print.
///
/// Override tables key on this id together with the copy index, so ids
/// must be unique across every object of a print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// What an extrusion is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtrusionRole {
    /// Outermost wall.
    ExternalPerimeter,
    /// Inner walls.
    #[default]
    Perimeter,
    /// Sparse infill.
    Infill,
    /// Solid infill.
    SolidInfill,
    /// Support body.
    SupportMaterial,
    /// Support contact layer.
    SupportInterface,
}

impl ExtrusionRole {
    /// Walls of the part.
    pub fn is_perimeter(self) -> bool {
        matches!(self, Self::ExternalPerimeter | Self::Perimeter)
    }

    /// Interior fill of the part.
    pub fn is_infill(self) -> bool {
        matches!(self, Self::Infill | Self::SolidInfill)
    }

    /// Support material of any kind.
    pub fn is_support(self) -> bool {
        matches!(self, Self::SupportMaterial | Self::SupportInterface)
    }
}

/// Winding of an arc move, viewed from above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArcDirection {
    /// Clockwise (G2).
    Clockwise,
    /// Counter-clockwise (G3).
    CounterClockwise,
}

/// One piece of an extrusion path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathSegment {
    /// Straight move to `to`.
    Line {
        /// End point (mm).
        to: [f64; 2],
    },
    /// Circular move to `to` around `center`.
    Arc {
        /// End point (mm).
        to: [f64; 2],
        /// Arc center (mm, absolute).
        center: [f64; 2],
        /// Winding.
        direction: ArcDirection,
    },
}

impl PathSegment {
    /// End point of the segment.
    pub fn end(&self) -> Point2<f64> {
        match *self {
            Self::Line { to } | Self::Arc { to, .. } => Point2::new(to[0], to[1]),
        }
    }

    /// Length of the segment when it starts at `from`.
    pub fn length_from(&self, from: Point2<f64>) -> f64 {
        match *self {
            Self::Line { to } => (Point2::new(to[0], to[1]) - from).norm(),
            Self::Arc {
                to,
                center,
                direction,
            } => {
                let c = Point2::new(center[0], center[1]);
                let start = from - c;
                let end = Point2::new(to[0], to[1]) - c;
                let a0 = start.y.atan2(start.x);
                let a1 = end.y.atan2(end.x);
                let mut sweep = match direction {
                    ArcDirection::CounterClockwise => a1 - a0,
                    ArcDirection::Clockwise => a0 - a1,
                }
                .rem_euclid(TAU);
                // Coincident endpoints describe a full circle.
                if sweep < 1e-9 {
                    sweep = TAU;
                }
                start.norm() * sweep
            }
        }
    }
}

/// A continuous extrusion printed with one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtrusionPath {
    /// Entity identity.
    pub id: EntityId,
    /// Extrusion role.
    #[serde(default)]
    pub role: ExtrusionRole,
    /// Nominal tool.
    pub tool: u32,
    /// Deposited volume per unit of length (mm³/mm).
    pub mm3_per_mm: f64,
    /// Print speed (mm/s).
    pub speed: f64,
    /// Start point (mm).
    pub start: [f64; 2],
    /// Segments following the start point.
    pub segments: Vec<PathSegment>,
}

impl ExtrusionPath {
    /// Start point as a nalgebra point.
    pub fn start_point(&self) -> Point2<f64> {
        Point2::new(self.start[0], self.start[1])
    }

    /// Last point of the path.
    pub fn end_point(&self) -> Point2<f64> {
        self.segments
            .last()
            .map(PathSegment::end)
            .unwrap_or_else(|| self.start_point())
    }

    /// Total path length (mm).
    pub fn length(&self) -> f64 {
        let mut from = self.start_point();
        let mut total = 0.0;
        for segment in &self.segments {
            total += segment.length_from(from);
            from = segment.end();
        }
        total
    }

    /// Deposited volume (mm³).
    pub fn volume(&self) -> f64 {
        self.length() * self.mm3_per_mm
    }

    /// Check coordinates and flow values.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| Err(SlicerError::InvalidPath(self.id.0, reason.into()));
        if self.segments.is_empty() {
            return fail("path has no segments");
        }
        if !self.mm3_per_mm.is_finite() || self.mm3_per_mm < 0.0 {
            return fail("mm3_per_mm must be finite and non-negative");
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return fail("speed must be positive");
        }
        let finite = |p: &[f64; 2]| p.iter().all(|v| v.is_finite());
        let coords_ok = finite(&self.start)
            && self.segments.iter().all(|s| match s {
                PathSegment::Line { to } => finite(to),
                PathSegment::Arc { to, center, .. } => finite(to) && finite(center),
            });
        if !coords_ok {
            return fail("non-finite coordinate");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn line_path(points: &[[f64; 2]]) -> ExtrusionPath {
        ExtrusionPath {
            id: EntityId(1),
            role: ExtrusionRole::Perimeter,
            tool: 0,
            mm3_per_mm: 0.05,
            speed: 40.0,
            start: points[0],
            segments: points[1..]
                .iter()
                .map(|&to| PathSegment::Line { to })
                .collect(),
        }
    }

    #[test]
    fn test_line_length_and_volume() {
        let path = line_path(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]);
        assert_relative_eq!(path.length(), 20.0);
        assert_relative_eq!(path.volume(), 1.0);
        assert_eq!(path.end_point(), Point2::new(10.0, 10.0));
    }

    #[test]
    fn test_arc_length_follows_winding() {
        let quarter = PathSegment::Arc {
            to: [0.0, 10.0],
            center: [0.0, 0.0],
            direction: ArcDirection::CounterClockwise,
        };
        assert_relative_eq!(
            quarter.length_from(Point2::new(10.0, 0.0)),
            5.0 * PI,
            epsilon = 1e-9
        );

        let long_way = PathSegment::Arc {
            to: [0.0, 10.0],
            center: [0.0, 0.0],
            direction: ArcDirection::Clockwise,
        };
        assert_relative_eq!(
            long_way.length_from(Point2::new(10.0, 0.0)),
            15.0 * PI,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_full_circle_arc() {
        let circle = PathSegment::Arc {
            to: [5.0, 0.0],
            center: [0.0, 0.0],
            direction: ArcDirection::Clockwise,
        };
        assert_relative_eq!(
            circle.length_from(Point2::new(5.0, 0.0)),
            10.0 * PI,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_validate_rejects_bad_paths() {
        let mut path = line_path(&[[0.0, 0.0], [1.0, 0.0]]);
        assert!(path.validate().is_ok());

        path.speed = 0.0;
        assert!(path.validate().is_err());

        let mut path = line_path(&[[0.0, 0.0], [f64::NAN, 0.0]]);
        assert!(path.validate().is_err());
        path.segments.clear();
        assert!(path.validate().is_err());
    }

    #[test]
    fn test_role_classes() {
        assert!(ExtrusionRole::ExternalPerimeter.is_perimeter());
        assert!(ExtrusionRole::SolidInfill.is_infill());
        assert!(ExtrusionRole::SupportInterface.is_support());
        assert!(!ExtrusionRole::Infill.is_perimeter());
    }
}
