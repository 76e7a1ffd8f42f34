//! Printable objects and their layers.

use std::collections::{BTreeSet, HashSet};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlicerError};
use crate::path::ExtrusionPath;
use crate::EPSILON;

/// One layer of an object, or one layer of its support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectLayer {
    /// Top of the layer (mm).
    pub print_z: f64,
    /// Layer thickness (mm).
    pub height: f64,
    /// Extrusions in print order.
    #[serde(default)]
    pub paths: Vec<ExtrusionPath>,
}

impl ObjectLayer {
    /// Sorted set of tools used by this layer.
    pub fn tools(&self) -> BTreeSet<u32> {
        self.paths.iter().map(|p| p.tool).collect()
    }

    /// Tool of the first wall path, if the layer has walls.
    pub fn perimeter_tool(&self) -> Option<u32> {
        self.paths
            .iter()
            .find(|p| p.role.is_perimeter())
            .map(|p| p.tool)
    }
}

fn default_copies() -> Vec<[f64; 2]> {
    vec![[0.0, 0.0]]
}

/// An object placed on the bed, possibly several times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintObject {
    /// Display name.
    pub name: String,
    /// XY offset of every copy (mm).
    #[serde(default = "default_copies")]
    pub copies: Vec<[f64; 2]>,
    /// Whole object may absorb purge material from tool changes.
    #[serde(default)]
    pub wipe_into_objects: bool,
    /// Infill of this object may absorb purge material.
    #[serde(default)]
    pub wipe_into_infill: bool,
    /// Object layers, bottom up.
    #[serde(default)]
    pub layers: Vec<ObjectLayer>,
    /// Support and raft layers, bottom up.
    #[serde(default)]
    pub support_layers: Vec<ObjectLayer>,
}

impl PrintObject {
    /// Create an object with a single copy at the origin.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            copies: default_copies(),
            wipe_into_objects: false,
            wipe_into_infill: false,
            layers: Vec::new(),
            support_layers: Vec::new(),
        }
    }

    /// Offset of copy `index`.
    pub fn copy_offset(&self, index: usize) -> Vector2<f64> {
        let c = self.copies[index];
        Vector2::new(c[0], c[1])
    }

    /// Bottom of the first object layer. Anything printed below it is raft.
    pub fn bottom_z(&self) -> Option<f64> {
        self.layers.first().map(|l| l.print_z - l.height)
    }

    /// Object layer printed at `print_z`.
    pub fn layer_at(&self, print_z: f64) -> Option<&ObjectLayer> {
        find_layer(&self.layers, print_z)
    }

    /// Support layer printed at `print_z`.
    pub fn support_layer_at(&self, print_z: f64) -> Option<&ObjectLayer> {
        find_layer(&self.support_layers, print_z)
    }

    /// Every print height of the object, object and support alike.
    pub fn print_zs(&self) -> impl Iterator<Item = f64> + '_ {
        self.layers
            .iter()
            .chain(&self.support_layers)
            .map(|l| l.print_z)
    }

    fn validate(&self) -> Result<()> {
        if self.copies.is_empty() {
            return Err(SlicerError::NoCopies(self.name.clone()));
        }
        for stack in [&self.layers, &self.support_layers] {
            let mut below = f64::NEG_INFINITY;
            for layer in stack {
                let invalid = |reason: &str| SlicerError::InvalidLayer {
                    object: self.name.clone(),
                    print_z: layer.print_z,
                    reason: reason.into(),
                };
                if !layer.print_z.is_finite() || !layer.height.is_finite() {
                    return Err(invalid("non-finite height"));
                }
                if layer.height <= 0.0 {
                    return Err(invalid("layer height must be positive"));
                }
                if layer.print_z <= below {
                    return Err(invalid("layers must be sorted bottom up"));
                }
                below = layer.print_z;
                for path in &layer.paths {
                    path.validate()?;
                }
            }
        }
        Ok(())
    }
}

fn find_layer(layers: &[ObjectLayer], print_z: f64) -> Option<&ObjectLayer> {
    let idx = layers.partition_point(|l| l.print_z < print_z - EPSILON);
    layers
        .get(idx)
        .filter(|l| (l.print_z - print_z).abs() < EPSILON)
}

/// Everything on the bed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Print {
    /// Objects in print order.
    pub objects: Vec<PrintObject>,
}

impl Print {
    /// Check layer ordering, coordinates and entity id uniqueness.
    pub fn validate(&self) -> Result<()> {
        if self.objects.is_empty() {
            return Err(SlicerError::EmptyPrint);
        }
        let mut seen = HashSet::new();
        for object in &self.objects {
            object.validate()?;
            let paths = object
                .layers
                .iter()
                .chain(&object.support_layers)
                .flat_map(|l| &l.paths);
            for path in paths {
                if !seen.insert(path.id) {
                    return Err(SlicerError::DuplicateEntity(path.id.0));
                }
            }
        }
        Ok(())
    }

    /// Sorted ids of every tool any path asks for.
    pub fn tool_ids(&self) -> Vec<u32> {
        let tools: BTreeSet<u32> = self
            .objects
            .iter()
            .flat_map(|o| o.layers.iter().chain(&o.support_layers))
            .flat_map(|l| l.paths.iter().map(|p| p.tool))
            .collect();
        tools.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{EntityId, ExtrusionRole, PathSegment};

    fn path(id: u64, tool: u32, role: ExtrusionRole) -> ExtrusionPath {
        ExtrusionPath {
            id: EntityId(id),
            role,
            tool,
            mm3_per_mm: 0.05,
            speed: 40.0,
            start: [0.0, 0.0],
            segments: vec![PathSegment::Line { to: [5.0, 0.0] }],
        }
    }

    fn layer(print_z: f64, paths: Vec<ExtrusionPath>) -> ObjectLayer {
        ObjectLayer {
            print_z,
            height: 0.2,
            paths,
        }
    }

    #[test]
    fn test_layer_lookup_tolerates_float_noise() {
        let mut object = PrintObject::new("cube");
        object.layers = vec![layer(0.2, vec![]), layer(0.4, vec![]), layer(0.6, vec![])];
        assert!(object.layer_at(0.4 + 1e-7).is_some());
        assert!(object.layer_at(0.5).is_none());
        assert!((object.bottom_z().unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_tool_queries() {
        let mut object = PrintObject::new("cube");
        object.layers = vec![layer(
            0.2,
            vec![
                path(1, 2, ExtrusionRole::Infill),
                path(2, 1, ExtrusionRole::Perimeter),
            ],
        )];
        let print = Print {
            objects: vec![object],
        };
        assert_eq!(print.tool_ids(), vec![1, 2]);
        assert_eq!(print.objects[0].layers[0].perimeter_tool(), Some(1));
    }

    #[test]
    fn test_validate() {
        assert!(matches!(Print::default().validate(), Err(SlicerError::EmptyPrint)));

        let mut object = PrintObject::new("cube");
        object.layers = vec![
            layer(0.2, vec![path(1, 0, ExtrusionRole::Perimeter)]),
            layer(0.4, vec![path(1, 0, ExtrusionRole::Perimeter)]),
        ];
        let print = Print {
            objects: vec![object.clone()],
        };
        assert!(matches!(print.validate(), Err(SlicerError::DuplicateEntity(1))));

        object.layers[1].paths[0].id = EntityId(2);
        object.layers.swap(0, 1);
        let print = Print {
            objects: vec![object],
        };
        assert!(matches!(print.validate(), Err(SlicerError::InvalidLayer { .. })));
    }

    #[test]
    fn test_deserialize_job() {
        let json = r#"{
            "objects": [{
                "name": "pin",
                "layers": [{
                    "print_z": 0.2,
                    "height": 0.2,
                    "paths": [{
                        "id": 7,
                        "role": "external_perimeter",
                        "tool": 0,
                        "mm3_per_mm": 0.04,
                        "speed": 30.0,
                        "start": [0.0, 0.0],
                        "segments": [{"kind": "line", "to": [1.0, 0.0]}]
                    }]
                }]
            }]
        }"#;
        let print: Print = serde_json::from_str(json).unwrap();
        assert_eq!(print.objects[0].copies, vec![[0.0, 0.0]]);
        assert!(print.validate().is_ok());
    }
}
