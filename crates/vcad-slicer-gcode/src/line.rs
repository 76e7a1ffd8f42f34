//! Fixed-precision G-code line builder.
//!
//! Every motion line goes through [`GcodeLine`]. Numbers are rounded to a
//! fixed number of decimals and printed in the shortest form firmware
//! accepts: trailing zeros and a dangling `.` are dropped, and pure
//! fractions lose their leading zero (`X.5`, `E-.05`).

use nalgebra::{Vector2, Vector3};
use vcad_slicer::ArcDirection;

/// Decimals for X, Y, Z, I, J and F.
pub const XYZF_EXPORT_DIGITS: usize = 3;

/// Decimals for E.
pub const E_EXPORT_DIGITS: usize = 5;

/// Longest line the builder accepts, newline included.
pub const LINE_CAPACITY: usize = 256;

/// Motion command of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `G1`
    Linear,
    /// `G2`
    ArcCw,
    /// `G3`
    ArcCcw,
}

impl LineKind {
    /// Command word.
    pub fn command(self) -> &'static str {
        match self {
            Self::Linear => "G1",
            Self::ArcCw => "G2",
            Self::ArcCcw => "G3",
        }
    }
}

impl From<ArcDirection> for LineKind {
    fn from(direction: ArcDirection) -> Self {
        match direction {
            ArcDirection::Clockwise => Self::ArcCw,
            ArcDirection::CounterClockwise => Self::ArcCcw,
        }
    }
}

/// One G-code line under construction.
///
/// The command is fixed at construction; fields are appended in call order
/// and [`GcodeLine::finish`] consumes the builder.
pub struct GcodeLine {
    buf: [u8; LINE_CAPACITY],
    len: usize,
}

impl GcodeLine {
    /// Start a line with the command of `kind`.
    pub fn new(kind: LineKind) -> Self {
        let mut line = Self {
            buf: [0; LINE_CAPACITY],
            len: 0,
        };
        line.push(kind.command());
        line
    }

    /// Start a `G1` line.
    pub fn linear() -> Self {
        Self::new(LineKind::Linear)
    }

    fn push(&mut self, s: &str) {
        let bytes = s.as_bytes();
        // One byte stays reserved for the newline.
        assert!(
            self.len + bytes.len() < LINE_CAPACITY,
            "G-code line longer than {LINE_CAPACITY} bytes"
        );
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Append raw text.
    pub fn emit_str(&mut self, s: &str) {
        self.push(s);
    }

    /// Append ` <axis><value>` with `digits` decimals.
    pub fn emit_axis(&mut self, axis: char, value: f64, digits: usize) {
        let mut field = String::with_capacity(16);
        field.push(' ');
        field.push(axis);
        field.push_str(&format_fixed(value, digits));
        self.push(&field);
    }

    /// Append X and Y.
    pub fn emit_xy(&mut self, point: Vector2<f64>) {
        self.emit_axis('X', point.x, XYZF_EXPORT_DIGITS);
        self.emit_axis('Y', point.y, XYZF_EXPORT_DIGITS);
    }

    /// Append X, Y and Z.
    pub fn emit_xyz(&mut self, point: Vector3<f64>) {
        self.emit_axis('X', point.x, XYZF_EXPORT_DIGITS);
        self.emit_axis('Y', point.y, XYZF_EXPORT_DIGITS);
        self.emit_z(point.z);
    }

    /// Append Z.
    pub fn emit_z(&mut self, z: f64) {
        self.emit_axis('Z', z, XYZF_EXPORT_DIGITS);
    }

    /// Append E.
    pub fn emit_e(&mut self, e: f64) {
        self.emit_axis('E', e, E_EXPORT_DIGITS);
    }

    /// Append F (mm/min).
    pub fn emit_f(&mut self, f: f64) {
        self.emit_axis('F', f, XYZF_EXPORT_DIGITS);
    }

    /// Append the arc center offset as I and J.
    pub fn emit_ij(&mut self, offset: Vector2<f64>) {
        self.emit_axis('I', offset.x, XYZF_EXPORT_DIGITS);
        self.emit_axis('J', offset.y, XYZF_EXPORT_DIGITS);
    }

    /// Append ` ; comment` when `enabled` and the comment is not empty.
    pub fn emit_comment(&mut self, enabled: bool, comment: &str) {
        if enabled && !comment.is_empty() {
            self.push(" ; ");
            self.push(comment);
        }
    }

    /// Terminate the line.
    pub fn finish(mut self) -> String {
        self.buf[self.len] = b'\n';
        self.len += 1;
        // Only whole `&str`s were copied in.
        String::from_utf8_lossy(&self.buf[..self.len]).into_owned()
    }
}

/// Format `value` with at most `digits` decimals in the trimmed G-code form.
pub fn format_fixed(value: f64, digits: usize) -> String {
    let scale = 10_i64.pow(digits as u32);
    let scaled = (value * scale as f64).round() as i64;
    if scaled == 0 {
        return "0".into();
    }
    let sign = if scaled < 0 { "-" } else { "" };
    let magnitude = scaled.unsigned_abs();
    let int_part = magnitude / scale as u64;
    let frac_part = magnitude % scale as u64;
    if frac_part == 0 {
        return format!("{sign}{int_part}");
    }
    let frac = format!("{frac_part:0digits$}");
    let frac = frac.trim_end_matches('0');
    if int_part == 0 {
        format!("{sign}.{frac}")
    } else {
        format!("{sign}{int_part}.{frac}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fixed_trimming() {
        assert_eq!(format_fixed(0.5, 3), ".5");
        assert_eq!(format_fixed(-0.05, 5), "-.05");
        assert_eq!(format_fixed(10.0, 3), "10");
        assert_eq!(format_fixed(0.0, 3), "0");
        assert_eq!(format_fixed(-0.0004, 3), "0");
        assert_eq!(format_fixed(12.3456, 3), "12.346");
        assert_eq!(format_fixed(1.00001, 5), "1.00001");
        assert_eq!(format_fixed(-2.1, 3), "-2.1");
        assert_eq!(format_fixed(9000.0, 3), "9000");
    }

    #[test]
    fn test_linear_move_line() {
        let mut line = GcodeLine::linear();
        line.emit_xy(Vector2::new(10.0, 0.5));
        line.emit_e(0.12345678);
        line.emit_comment(true, "perimeter");
        assert_eq!(line.finish(), "G1 X10 Y.5 E.12346 ; perimeter\n");
    }

    #[test]
    fn test_comment_gating() {
        let mut line = GcodeLine::linear();
        line.emit_f(1800.0);
        line.emit_comment(false, "hidden");
        line.emit_comment(true, "");
        assert_eq!(line.finish(), "G1 F1800\n");
    }

    #[test]
    fn test_arc_line() {
        let mut line = GcodeLine::new(LineKind::from(ArcDirection::CounterClockwise));
        line.emit_xy(Vector2::new(1.0, 2.0));
        line.emit_ij(Vector2::new(-0.25, 0.0));
        assert_eq!(line.finish(), "G3 X1 Y2 I-.25 J0\n");
        assert_eq!(LineKind::from(ArcDirection::Clockwise).command(), "G2");
    }

    #[test]
    #[should_panic]
    fn test_overflow_panics() {
        let mut line = GcodeLine::linear();
        line.emit_comment(true, &"x".repeat(LINE_CAPACITY));
    }
}
