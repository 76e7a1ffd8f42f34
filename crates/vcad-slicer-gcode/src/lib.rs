#![warn(missing_docs)]

//! G-code generation for the vcad slicer.
//!
//! [`GcodeWriter`] tracks the machine state (position, loaded tool, lift,
//! retraction, speed) and only emits commands that change it. Numbers go
//! through [`GcodeLine`] so every line has the same fixed precision.
//! [`GcodeGenerator`] ties the writer to the tool schedule of a print.
//!
//! # Example
//!
//! ```ignore
//! use vcad_slicer_gcode::{generate_gcode, GcodeConfig, GcodeSettings};
//!
//! let print: vcad_slicer::Print = serde_json::from_str(&job)?;
//! let settings = GcodeSettings::new(GcodeConfig::prusa_xl_5t());
//!
//! let gcode = generate_gcode(&print, &settings)?;
//! std::fs::write("output.gcode", gcode)?;
//! ```

pub mod config;
pub mod error;
pub mod extruder;
pub mod flavor;
pub mod generator;
pub mod line;
pub mod writer;

pub use config::{ExtruderConfig, GcodeConfig, LiftType};
pub use error::{ConfigError, GcodeError, Result};
pub use extruder::Extruder;
pub use flavor::GcodeFlavor;
pub use generator::{generate_gcode, GcodeGenerator, GcodeSettings};
pub use line::{format_fixed, GcodeLine, LineKind};
pub use writer::{fan_command, GcodeWriter, LiftState};
