//! Tool plan of a single print height.

use crate::wiping::WipingExtrusions;

/// Tools needed at one print height, in the order they will be used.
#[derive(Debug, Clone, Default)]
pub struct LayerTools {
    /// Top of the layer (mm).
    pub print_z: f64,
    /// Some object prints at this height.
    pub has_object: bool,
    /// Some support prints at this height.
    pub has_support: bool,
    /// Tools in print order.
    pub extruders: Vec<u32>,
    /// The wipe tower grows at this height.
    pub has_wipe_tower: bool,
    /// Tool changes the tower must absorb here or on any layer above.
    pub wipe_tower_partitions: usize,
    /// Distance to the previous tower layer (mm).
    pub wipe_tower_layer_height: f64,
    /// Purge volume the objects could not absorb (mm³).
    pub wipe_tower_volume: f64,
    /// Entities reassigned to purge a tool change.
    pub wiping_extrusions: WipingExtrusions,
    /// Object geometry here can print with any tool.
    pub(crate) dont_care: bool,
}

impl LayerTools {
    /// Empty plan at `print_z`.
    pub fn new(print_z: f64) -> Self {
        Self {
            print_z,
            ..Default::default()
        }
    }

    /// True if `a` is used before `b` on this layer.
    pub fn is_extruder_order(&self, a: u32, b: u32) -> bool {
        if a == b {
            return false;
        }
        for &tool in &self.extruders {
            if tool == a {
                return true;
            }
            if tool == b {
                return false;
            }
        }
        false
    }

    /// Whether `tool` prints on this layer.
    pub fn has_tool(&self, tool: u32) -> bool {
        self.extruders.contains(&tool)
    }

    /// Only support prints at this height.
    pub fn is_support_only(&self) -> bool {
        self.has_support && !self.has_object
    }

    /// Tool changes needed here when `active` is loaded on entry.
    pub fn toolchange_count(&self, active: Option<u32>) -> usize {
        let mut current = active;
        let mut changes = 0;
        for &tool in &self.extruders {
            if current.is_some_and(|c| c != tool) {
                changes += 1;
            }
            current = Some(tool);
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extruder_order() {
        let lt = LayerTools {
            extruders: vec![2, 0, 1],
            ..LayerTools::new(0.2)
        };
        assert!(lt.is_extruder_order(2, 1));
        assert!(!lt.is_extruder_order(1, 0));
        assert!(!lt.is_extruder_order(0, 0));
        assert!(!lt.is_extruder_order(3, 4));
    }

    #[test]
    fn test_toolchange_count() {
        let lt = LayerTools {
            extruders: vec![1, 2],
            ..LayerTools::new(0.4)
        };
        assert_eq!(lt.toolchange_count(Some(1)), 1);
        assert_eq!(lt.toolchange_count(Some(0)), 2);
        assert_eq!(lt.toolchange_count(None), 1);
    }
}
