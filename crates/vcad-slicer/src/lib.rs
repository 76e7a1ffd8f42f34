#![warn(missing_docs)]

//! Print model for the vcad slicer back end.
//!
//! Sliced objects arrive here as layers of extrusion paths. Tool ordering
//! and G-code generation consume this model; they never see meshes.
//!
//! # Example
//!
//! ```ignore
//! use vcad_slicer::Print;
//!
//! let print: Print = serde_json::from_str(&std::fs::read_to_string("job.json")?)?;
//! print.validate()?;
//! println!("Tools: {:?}", print.tool_ids());
//! ```

pub mod error;
pub mod object;
pub mod path;

pub use error::{Result, SlicerError};
pub use object::{ObjectLayer, Print, PrintObject};
pub use path::{ArcDirection, EntityId, ExtrusionPath, ExtrusionRole, PathSegment};

/// Two print heights closer than this are the same layer (mm).
pub const EPSILON: f64 = 1e-4;
