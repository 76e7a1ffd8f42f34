//! Error types for the print model.

use thiserror::Error;

/// Errors found while validating a print.
#[derive(Error, Debug)]
pub enum SlicerError {
    /// Print has no objects.
    #[error("print has no objects")]
    EmptyPrint,

    /// A layer has an unusable height.
    #[error("object '{object}' has an invalid layer at z={print_z}: {reason}")]
    InvalidLayer {
        /// Object name.
        object: String,
        /// Layer print height (mm).
        print_z: f64,
        /// What is wrong with it.
        reason: String,
    },

    /// An extrusion path is malformed.
    #[error("invalid extrusion path {0}: {1}")]
    InvalidPath(u64, String),

    /// Two paths share an entity id.
    #[error("duplicate extrusion entity id {0}")]
    DuplicateEntity(u64),

    /// Object is placed nowhere.
    #[error("object '{0}' has no copies")]
    NoCopies(String),
}

/// Result type for print model operations.
pub type Result<T> = std::result::Result<T, SlicerError>;
