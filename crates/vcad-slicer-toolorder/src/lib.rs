#![warn(missing_docs)]

//! Tool ordering for multi-material printing.
//!
//! Decides, for every print height, which tools print and in what order so
//! that tool changes are rare, sizes the wipe tower that absorbs the purge
//! of each change, and records which extrusions were reassigned to purge
//! material instead.
//!
//! # Example
//!
//! ```ignore
//! use vcad_slicer_toolorder::{PrintContext, ToolOrdering};
//!
//! let ctx = PrintContext::with_tools(2);
//! let ordering = ToolOrdering::for_print(&print, None, &ctx);
//! for lt in &ordering {
//!     println!("z={:.2} tools={:?}", lt.print_z, lt.extruders);
//! }
//! ```

pub mod context;
pub mod layer_tools;
pub mod ordering;
pub mod wiping;

pub use context::{PrintContext, ToolProperties};
pub use layer_tools::LayerTools;
pub use ordering::ToolOrdering;
pub use wiping::{CopyTool, WipeCandidate, WipingExtrusions};
