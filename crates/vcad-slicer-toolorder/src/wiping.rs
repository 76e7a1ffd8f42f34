//! Purging into objects instead of the wipe tower.
//!
//! After a tool change the nozzle still holds the old material. Some of it
//! can be pushed out through extrusions of the new tool that nobody sees:
//! infill, or whole objects marked as sacrificial. This table records which
//! (entity, copy) pairs were reassigned that way.

use std::collections::HashMap;

use tracing::debug;
use vcad_slicer::{EntityId, ExtrusionPath};

use crate::context::PrintContext;

/// Tool a single copy of an entity prints with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyTool {
    /// Nothing overridden; the entity's own tool.
    Nominal(u32),
    /// Reassigned to purge a tool change.
    Wipe(u32),
}

impl CopyTool {
    /// The tool, whatever the reason.
    pub fn tool(self) -> u32 {
        match self {
            Self::Nominal(t) | Self::Wipe(t) => t,
        }
    }

    /// Whether this copy is a wiping extrusion.
    pub fn is_wipe(self) -> bool {
        matches!(self, Self::Wipe(_))
    }
}

/// An entity that may absorb purge material.
#[derive(Debug, Clone, Copy)]
pub struct WipeCandidate<'a> {
    /// The extrusion.
    pub path: &'a ExtrusionPath,
    /// Copies of the owning object.
    pub num_copies: usize,
    /// The owning object is dedicated to wiping.
    pub wipe_into_objects: bool,
    /// The owning object accepts purge into its infill.
    pub wipe_into_infill: bool,
    /// Perimeter tool of the owning object on this layer.
    pub perimeter_tool: Option<u32>,
}

/// Override table of one layer: `(entity, copy) -> tool`.
#[derive(Debug, Clone, Default)]
pub struct WipingExtrusions {
    overrides: HashMap<EntityId, Vec<Option<u32>>>,
    something_overridden: bool,
}

impl WipingExtrusions {
    /// Whether any override was ever set.
    pub fn is_anything_overridden(&self) -> bool {
        self.something_overridden
    }

    /// Raw override of one copy.
    pub fn extruder_override(&self, entity: EntityId, copy: usize) -> Option<u32> {
        self.overrides
            .get(&entity)
            .and_then(|copies| copies.get(copy).copied().flatten())
    }

    /// True if the copy is overridden to something other than `nominal`.
    ///
    /// Answers whether the copy changes tool. A copy purging into its own
    /// nominal tool is still a wiping extrusion for
    /// [`WipingExtrusions::get_extruder_overrides`], but not overridden here.
    pub fn is_entity_overridden(&self, entity: EntityId, copy: usize, nominal: u32) -> bool {
        self.extruder_override(entity, copy)
            .is_some_and(|tool| tool != nominal)
    }

    /// Set or clear the override of one copy.
    ///
    /// # Panics
    ///
    /// Panics if `copy >= num_copies`.
    pub fn set_extruder_override(
        &mut self,
        entity: EntityId,
        copy: usize,
        tool: Option<u32>,
        num_copies: usize,
    ) {
        assert!(
            copy < num_copies,
            "copy {copy} out of range for {num_copies} copies"
        );
        let copies = self.overrides.entry(entity).or_default();
        copies.resize(num_copies, None);
        copies[copy] = tool;
        if tool.is_some() {
            self.something_overridden = true;
        }
    }

    /// Tool of every copy of `entity`.
    ///
    /// Any override reports [`CopyTool::Wipe`], even one naming `nominal`:
    /// the copy absorbs purge and prints right after the tool change.
    pub fn get_extruder_overrides(
        &self,
        entity: EntityId,
        nominal: u32,
        num_copies: usize,
    ) -> Vec<CopyTool> {
        (0..num_copies)
            .map(|copy| match self.extruder_override(entity, copy) {
                Some(tool) => CopyTool::Wipe(tool),
                None => CopyTool::Nominal(nominal),
            })
            .collect()
    }

    /// Drop every override.
    pub fn clear(&mut self) {
        self.overrides.clear();
        self.something_overridden = false;
    }

    /// Reassign entities to `new_tool` until `volume_to_wipe` is used up.
    ///
    /// `layer_order` is the tool order of the layer. Dedicated objects are
    /// consumed first, then infill of objects that allow it. Returns the
    /// volume left for the wipe tower.
    pub fn mark_wiping_extrusions(
        &mut self,
        layer_order: &[u32],
        candidates: &[WipeCandidate<'_>],
        ctx: &PrintContext,
        old_tool: u32,
        new_tool: u32,
        volume_to_wipe: f64,
    ) -> f64 {
        if ctx.is_soluble(old_tool) || ctx.is_soluble(new_tool) {
            return volume_to_wipe;
        }

        let mut volume = volume_to_wipe;
        for dedicated in [true, false] {
            for candidate in candidates.iter().filter(|c| c.wipe_into_objects == dedicated) {
                if volume <= 0.0 {
                    return 0.0;
                }
                if !self.accepts(layer_order, candidate, ctx, new_tool) {
                    continue;
                }
                let path_volume = candidate.path.volume();
                if path_volume <= 0.0 {
                    continue;
                }
                for copy in 0..candidate.num_copies {
                    if volume <= 0.0 {
                        break;
                    }
                    if self.extruder_override(candidate.path.id, copy).is_some() {
                        continue;
                    }
                    self.set_extruder_override(
                        candidate.path.id,
                        copy,
                        Some(new_tool),
                        candidate.num_copies,
                    );
                    volume -= path_volume;
                    debug!(
                        entity = candidate.path.id.0,
                        copy,
                        from = old_tool,
                        to = new_tool,
                        path_volume,
                        "purging into extrusion"
                    );
                }
            }
        }
        volume.max(0.0)
    }

    fn accepts(
        &self,
        layer_order: &[u32],
        candidate: &WipeCandidate<'_>,
        ctx: &PrintContext,
        new_tool: u32,
    ) -> bool {
        let role = candidate.path.role;
        if role.is_support() {
            return false;
        }
        if candidate.wipe_into_objects {
            return true;
        }
        if !candidate.wipe_into_infill || !role.is_infill() {
            return false;
        }
        if ctx.infill_first {
            return true;
        }
        // Infill must not be printed before the walls around it.
        match candidate.perimeter_tool {
            Some(perimeter) => is_before(layer_order, perimeter, new_tool),
            None => true,
        }
    }
}

fn is_before(order: &[u32], a: u32, b: u32) -> bool {
    if a == b {
        return false;
    }
    order
        .iter()
        .find(|&&t| t == a || t == b)
        .is_some_and(|&t| t == a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcad_slicer::{ExtrusionRole, PathSegment};

    fn path(id: u64, tool: u32, role: ExtrusionRole, length: f64) -> ExtrusionPath {
        ExtrusionPath {
            id: EntityId(id),
            role,
            tool,
            mm3_per_mm: 1.0,
            speed: 50.0,
            start: [0.0, 0.0],
            segments: vec![PathSegment::Line { to: [length, 0.0] }],
        }
    }

    fn candidate(path: &ExtrusionPath, copies: usize) -> WipeCandidate<'_> {
        WipeCandidate {
            path,
            num_copies: copies,
            wipe_into_objects: false,
            wipe_into_infill: true,
            perimeter_tool: Some(0),
        }
    }

    #[test]
    fn test_empty_table_prints_nominal() {
        let table = WipingExtrusions::default();
        assert!(!table.is_anything_overridden());
        assert_eq!(
            table.get_extruder_overrides(EntityId(3), 1, 2),
            vec![CopyTool::Nominal(1), CopyTool::Nominal(1)]
        );
    }

    #[test]
    fn test_override_single_copy() {
        let mut table = WipingExtrusions::default();
        table.set_extruder_override(EntityId(3), 1, Some(2), 3);
        assert!(table.is_anything_overridden());
        assert!(table.is_entity_overridden(EntityId(3), 1, 0));
        assert!(!table.is_entity_overridden(EntityId(3), 1, 2));
        assert!(!table.is_entity_overridden(EntityId(3), 0, 0));
        assert_eq!(
            table.get_extruder_overrides(EntityId(3), 0, 3),
            vec![CopyTool::Nominal(0), CopyTool::Wipe(2), CopyTool::Nominal(0)]
        );

        table.set_extruder_override(EntityId(3), 1, None, 3);
        assert_eq!(table.extruder_override(EntityId(3), 1), None);

        table.clear();
        assert!(!table.is_anything_overridden());
    }

    #[test]
    fn test_override_to_nominal_tool_still_wipes() {
        let mut table = WipingExtrusions::default();
        table.set_extruder_override(EntityId(4), 0, Some(1), 2);
        // Same tool: no tool change, but the copy absorbs purge.
        assert!(!table.is_entity_overridden(EntityId(4), 0, 1));
        assert_eq!(
            table.get_extruder_overrides(EntityId(4), 1, 2),
            vec![CopyTool::Wipe(1), CopyTool::Nominal(1)]
        );
        assert_eq!(
            table.get_extruder_overrides(EntityId(4), 1, 2)[0].tool(),
            table.extruder_override(EntityId(4), 0).unwrap()
        );
    }

    #[test]
    #[should_panic]
    fn test_copy_out_of_range_panics() {
        let mut table = WipingExtrusions::default();
        table.set_extruder_override(EntityId(1), 2, Some(0), 2);
    }

    #[test]
    fn test_marking_consumes_volume() {
        let infill = path(10, 0, ExtrusionRole::Infill, 30.0);
        let candidates = [candidate(&infill, 2)];
        let ctx = PrintContext::with_tools(2);
        let mut table = WipingExtrusions::default();

        let left = table.mark_wiping_extrusions(&[0, 1], &candidates, &ctx, 0, 1, 50.0);
        assert_eq!(left, 0.0);
        assert_eq!(table.extruder_override(EntityId(10), 0), Some(1));
        assert_eq!(table.extruder_override(EntityId(10), 1), Some(1));

        // Already used copies are not counted twice.
        let left = table.mark_wiping_extrusions(&[0, 1], &candidates, &ctx, 0, 1, 20.0);
        assert!((left - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_marking_respects_perimeter_order_and_soluble() {
        let infill = path(10, 0, ExtrusionRole::Infill, 30.0);
        let wall = path(11, 0, ExtrusionRole::Perimeter, 30.0);
        let mut ctx = PrintContext::with_tools(2);
        let mut table = WipingExtrusions::default();

        // Walls are printed by tool 1 after tool 0; infill must wait.
        let mut late_walls = candidate(&infill, 1);
        late_walls.perimeter_tool = Some(1);
        let left = table.mark_wiping_extrusions(&[0, 1], &[late_walls], &ctx, 0, 1, 10.0);
        assert!((left - 10.0).abs() < 1e-9);

        // Walls are never infill.
        let left = table.mark_wiping_extrusions(&[0, 1], &[candidate(&wall, 1)], &ctx, 0, 1, 10.0);
        assert!((left - 10.0).abs() < 1e-9);

        ctx.tools[1].soluble = true;
        let left = table.mark_wiping_extrusions(&[0, 1], &[candidate(&infill, 1)], &ctx, 0, 1, 10.0);
        assert!((left - 10.0).abs() < 1e-9);
        assert!(!table.is_anything_overridden());
    }

    #[test]
    fn test_dedicated_objects_go_first() {
        let infill = path(1, 0, ExtrusionRole::Infill, 30.0);
        let sacrificial = path(2, 0, ExtrusionRole::Perimeter, 30.0);
        let mut dedicated = candidate(&sacrificial, 1);
        dedicated.wipe_into_objects = true;
        let ctx = PrintContext::with_tools(2);
        let mut table = WipingExtrusions::default();

        let left = table.mark_wiping_extrusions(
            &[0, 1],
            &[candidate(&infill, 1), dedicated],
            &ctx,
            0,
            1,
            25.0,
        );
        assert_eq!(left, 0.0);
        assert_eq!(table.extruder_override(EntityId(2), 0), Some(1));
        assert_eq!(table.extruder_override(EntityId(1), 0), None);
    }
}
