//! Tool order across the layers of a print.

use std::collections::BTreeSet;

use rayon::prelude::*;
use tracing::{debug, info, warn};
use vcad_slicer::{Print, PrintObject, EPSILON};

use crate::context::PrintContext;
use crate::layer_tools::LayerTools;
use crate::wiping::WipeCandidate;

/// Tool schedule of a print, or of one object printed on its own.
#[derive(Debug, Clone, Default)]
pub struct ToolOrdering {
    layer_tools: Vec<LayerTools>,
    first_printing_extruder: Option<u32>,
    last_printing_extruder: Option<u32>,
    all_printing_extruders: Vec<u32>,
    prime_multi_material: bool,
    /// Nominal tools of walls left to whatever tool is loaded.
    sacrificial_tools: BTreeSet<u32>,
}

impl ToolOrdering {
    /// Schedule a single object, for sequential printing.
    ///
    /// `first_extruder` is the tool left active by whatever printed before.
    pub fn for_object(
        object: &PrintObject,
        first_extruder: Option<u32>,
        ctx: &PrintContext,
    ) -> Self {
        let mut ordering = Self {
            prime_multi_material: ctx.prime_multi_material,
            ..Default::default()
        };
        let zs: Vec<f64> = object.print_zs().collect();
        if zs.is_empty() {
            warn!(object = %object.name, "object has no layers, nothing to schedule");
            return ordering;
        }
        ordering.initialize_layers(zs);
        ordering.collect_extruders(object, false);
        ordering.finish(first_extruder, object.bottom_z(), ctx);
        ordering
    }

    /// Schedule every object of the print together, layer by layer.
    ///
    /// Purge material is also assigned to wiping extrusions where the
    /// objects allow it.
    pub fn for_print(print: &Print, first_extruder: Option<u32>, ctx: &PrintContext) -> Self {
        let mut ordering = Self {
            prime_multi_material: ctx.prime_multi_material,
            ..Default::default()
        };
        let zs: Vec<f64> = print.objects.iter().flat_map(PrintObject::print_zs).collect();
        if zs.is_empty() {
            warn!("print has no layers, nothing to schedule");
            return ordering;
        }
        ordering.initialize_layers(zs);
        for object in &print.objects {
            ordering.collect_extruders(object, true);
        }
        let bottom_z = print
            .objects
            .iter()
            .filter_map(PrintObject::bottom_z)
            .min_by(f64::total_cmp);
        ordering.finish(first_extruder, bottom_z, ctx);
        ordering.plan_wiping(print, ctx);
        ordering
    }

    fn finish(&mut self, first_extruder: Option<u32>, bottom_z: Option<f64>, ctx: &PrintContext) {
        self.mark_dont_care_layers();
        self.reorder_extruders(first_extruder);
        self.fill_wipe_tower_partitions(ctx, bottom_z);
        self.collect_extruder_statistics();
        info!(
            layers = self.layer_tools.len(),
            tools = ?self.all_printing_extruders,
            wipe_tower = self.has_wipe_tower(),
            "tool schedule ready"
        );
    }

    /// Register print heights. Heights closer than `EPSILON` collapse into
    /// their average.
    fn initialize_layers(&mut self, mut zs: Vec<f64>) {
        zs.sort_by(f64::total_cmp);
        zs.dedup();
        let mut i = 0;
        while i < zs.len() {
            let zmax = zs[i] + EPSILON;
            let mut j = i + 1;
            while j < zs.len() && zs[j] <= zmax {
                j += 1;
            }
            self.layer_tools
                .push(LayerTools::new(0.5 * (zs[i] + zs[j - 1])));
            i = j;
        }
    }

    fn collect_extruders(&mut self, object: &PrintObject, whole_print: bool) {
        for layer in &object.support_layers {
            let tools = layer.tools();
            if tools.is_empty() {
                continue;
            }
            if let Some(lt) = self.tools_for_layer_mut(layer.print_z) {
                lt.has_support = true;
                lt.extruders.extend(tools);
            }
        }

        for layer in &object.layers {
            if layer.paths.is_empty() {
                continue;
            }
            let Some(index) = self.layer_index(layer.print_z) else {
                continue;
            };
            let lt = &mut self.layer_tools[index];
            lt.has_object = true;
            for path in &layer.paths {
                // Walls of a sacrificial object print with whatever is loaded.
                let overridable =
                    whole_print && object.wipe_into_objects && path.role.is_perimeter();
                if overridable {
                    self.sacrificial_tools.insert(path.tool);
                } else {
                    lt.extruders.push(path.tool);
                }
            }
        }
    }

    fn mark_dont_care_layers(&mut self) {
        for lt in &mut self.layer_tools {
            lt.extruders.sort_unstable();
            lt.extruders.dedup();
            lt.dont_care = lt.has_object && lt.extruders.is_empty();
        }
    }

    fn reorder_extruders(&mut self, first_extruder: Option<u32>) {
        // With only sacrificial walls to print, they keep their own tool.
        let Some(start) = first_extruder
            .or_else(|| self.choose_first_extruder())
            .or_else(|| self.sacrificial_tools.first().copied())
        else {
            return;
        };
        reorder_layers(&mut self.layer_tools, start);
    }

    /// Starting tool that leads to the fewest switches over the whole print.
    ///
    /// Ties prefer the tool that stays loaded longest, then the lowest id.
    fn choose_first_extruder(&self) -> Option<u32> {
        let candidates = self
            .layer_tools
            .iter()
            .find(|lt| !lt.extruders.is_empty())?
            .extruders
            .clone();
        if candidates.len() == 1 {
            return candidates.first().copied();
        }
        let scored: Vec<(u32, usize, usize)> = candidates
            .par_iter()
            .map(|&tool| {
                let mut layers = self.layer_tools.clone();
                reorder_layers(&mut layers, tool);
                let (switches, first_run) = count_switches(&layers, tool);
                (tool, switches, first_run)
            })
            .collect();
        let best = scored
            .into_iter()
            .min_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)))?;
        debug!(
            tool = best.0,
            switches = best.1,
            "chose starting tool"
        );
        Some(best.0)
    }

    fn fill_wipe_tower_partitions(&mut self, ctx: &PrintContext, bottom_z: Option<f64>) {
        if self.layer_tools.is_empty() {
            return;
        }

        // Tool changes per layer.
        let mut last: Option<u32> = None;
        for lt in &mut self.layer_tools {
            lt.wipe_tower_partitions = lt.extruders.len();
            if let Some(&first) = lt.extruders.first() {
                if last.map_or(true, |l| l == first) {
                    lt.wipe_tower_partitions -= 1;
                }
                last = lt.extruders.last().copied();
            }
        }

        // The tower below must carry every partition above it.
        for i in (0..self.layer_tools.len() - 1).rev() {
            let above = self.layer_tools[i + 1].wipe_tower_partitions;
            let lt = &mut self.layer_tools[i];
            lt.wipe_tower_partitions = lt.wipe_tower_partitions.max(above);
        }

        let any_tool = self.layer_tools.iter().any(|lt| !lt.extruders.is_empty());
        let tower_needed = self.layer_tools[0].wipe_tower_partitions > 0
            || (self.prime_multi_material && any_tool);
        if !tower_needed {
            return;
        }

        let below_object = |z: f64| bottom_z.is_some_and(|b| z < b + EPSILON);
        for lt in &mut self.layer_tools {
            lt.has_wipe_tower =
                (lt.has_object && lt.wipe_tower_partitions > 0) || below_object(lt.print_z);
        }
        if self.prime_multi_material {
            self.layer_tools[0].has_wipe_tower = true;
        }

        self.bridge_raft_gap(ctx.max_layer_height(), bottom_z);

        let mut last_tower_z = 0.0;
        for lt in &mut self.layer_tools {
            if lt.has_wipe_tower {
                lt.wipe_tower_layer_height = lt.print_z - last_tower_z;
                last_tower_z = lt.print_z;
            }
        }
    }

    /// The tower cannot jump from the raft top to the first object layer if
    /// the gap is thicker than any tool can print.
    fn bridge_raft_gap(&mut self, max_layer_height: f64, bottom_z: Option<f64>) {
        let Some(bottom_z) = bottom_z else {
            return;
        };
        let Some(raft_top) = self
            .layer_tools
            .iter()
            .rposition(|lt| lt.print_z < bottom_z + EPSILON)
        else {
            return;
        };
        let Some(next_tower) = (raft_top + 1..self.layer_tools.len())
            .find(|&i| self.layer_tools[i].has_wipe_tower)
        else {
            return;
        };
        let gap = self.layer_tools[next_tower].print_z - self.layer_tools[raft_top].print_z;
        if gap <= max_layer_height + EPSILON {
            return;
        }
        if next_tower > raft_top + 1 {
            self.layer_tools[raft_top + 1].has_wipe_tower = true;
        } else {
            let mid_z = 0.5
                * (self.layer_tools[raft_top].print_z + self.layer_tools[next_tower].print_z);
            let partitions = self.layer_tools[next_tower].wipe_tower_partitions;
            self.layer_tools.insert(
                next_tower,
                LayerTools {
                    has_wipe_tower: true,
                    wipe_tower_partitions: partitions,
                    ..LayerTools::new(mid_z)
                },
            );
        }
        debug!(gap, "added wipe tower layer above raft");
    }

    fn collect_extruder_statistics(&mut self) {
        self.first_printing_extruder = self
            .layer_tools
            .iter()
            .find_map(|lt| lt.extruders.first().copied());
        self.last_printing_extruder = self
            .layer_tools
            .iter()
            .rev()
            .find_map(|lt| lt.extruders.last().copied());
        let all: BTreeSet<u32> = self
            .layer_tools
            .iter()
            .flat_map(|lt| lt.extruders.iter().copied())
            .collect();
        self.all_printing_extruders = all.into_iter().collect();

        // Prime in this order; the tool printing first is primed last.
        if let (true, Some(first)) = (self.prime_multi_material, self.first_printing_extruder) {
            self.all_printing_extruders.retain(|&t| t != first);
            self.all_printing_extruders.push(first);
            self.first_printing_extruder = self.all_printing_extruders.first().copied();
        }
    }

    fn plan_wiping(&mut self, print: &Print, ctx: &PrintContext) {
        let wiping_allowed = print
            .objects
            .iter()
            .any(|o| o.wipe_into_objects || o.wipe_into_infill);
        let mut active: Option<u32> = None;
        let mut total = 0.0;

        for lt in &mut self.layer_tools {
            let candidates: Vec<WipeCandidate<'_>> = print
                .objects
                .iter()
                .filter_map(|o| o.layer_at(lt.print_z).map(|layer| (o, layer)))
                .flat_map(|(o, layer)| {
                    let perimeter_tool = layer.perimeter_tool();
                    layer.paths.iter().map(move |path| WipeCandidate {
                        path,
                        num_copies: o.copies.len(),
                        wipe_into_objects: o.wipe_into_objects,
                        wipe_into_infill: o.wipe_into_infill,
                        perimeter_tool,
                    })
                })
                .collect();

            let order = lt.extruders.clone();
            for &tool in &order {
                if let Some(previous) = active.filter(|&a| a != tool) {
                    let volume = ctx.purge_volume(previous, tool);
                    let left = if wiping_allowed {
                        lt.wiping_extrusions.mark_wiping_extrusions(
                            &order, &candidates, ctx, previous, tool, volume,
                        )
                    } else {
                        volume
                    };
                    lt.wipe_tower_volume += left;
                }
                active = Some(tool);
            }

            // Sacrificial walls nobody purged into follow the tool left loaded.
            if let Some(&tail) = order.last() {
                for candidate in candidates.iter().filter(|c| {
                    c.wipe_into_objects && c.path.role.is_perimeter() && !order.contains(&c.path.tool)
                }) {
                    for copy in 0..candidate.num_copies {
                        if lt
                            .wiping_extrusions
                            .extruder_override(candidate.path.id, copy)
                            .is_none()
                        {
                            lt.wiping_extrusions.set_extruder_override(
                                candidate.path.id,
                                copy,
                                Some(tail),
                                candidate.num_copies,
                            );
                        }
                    }
                }
            }
            total += lt.wipe_tower_volume;
        }
        if total > 0.0 {
            info!(volume = total, "purge volume left for the wipe tower");
        }
    }

    /// Index of the registered layer nearest to `print_z`, within `EPSILON`.
    fn layer_index(&self, print_z: f64) -> Option<usize> {
        let idx = self
            .layer_tools
            .partition_point(|lt| lt.print_z < print_z - EPSILON);
        (idx..(idx + 2).min(self.layer_tools.len()))
            .map(|i| (i, (self.layer_tools[i].print_z - print_z).abs()))
            .filter(|&(_, d)| d < EPSILON)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Plan of the layer printed at `print_z`.
    pub fn tools_for_layer(&self, print_z: f64) -> Option<&LayerTools> {
        self.layer_index(print_z).map(|i| &self.layer_tools[i])
    }

    /// Mutable plan of the layer printed at `print_z`.
    pub fn tools_for_layer_mut(&mut self, print_z: f64) -> Option<&mut LayerTools> {
        self.layer_index(print_z).map(|i| &mut self.layer_tools[i])
    }

    /// Tool that prints first (or is primed first).
    pub fn first_extruder(&self) -> Option<u32> {
        self.first_printing_extruder
    }

    /// Tool active at the end of the print.
    pub fn last_extruder(&self) -> Option<u32> {
        self.last_printing_extruder
    }

    /// Every tool used, in priming order when priming is enabled.
    pub fn all_extruders(&self) -> &[u32] {
        &self.all_printing_extruders
    }

    /// Whether the print needs a wipe tower at all.
    pub fn has_wipe_tower(&self) -> bool {
        let Some(front) = self.layer_tools.first() else {
            return false;
        };
        self.first_printing_extruder.is_some()
            && (front.wipe_tower_partitions > 0 || self.prime_multi_material)
    }

    /// Ascending distinct print heights.
    pub fn print_zs(&self) -> Vec<f64> {
        self.layer_tools.iter().map(|lt| lt.print_z).collect()
    }

    /// All layer plans, bottom up.
    pub fn layer_tools(&self) -> &[LayerTools] {
        &self.layer_tools
    }

    /// Iterate over layer plans.
    pub fn iter(&self) -> std::slice::Iter<'_, LayerTools> {
        self.layer_tools.iter()
    }

    /// Lowest layer.
    pub fn front(&self) -> Option<&LayerTools> {
        self.layer_tools.first()
    }

    /// Highest layer.
    pub fn back(&self) -> Option<&LayerTools> {
        self.layer_tools.last()
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layer_tools.len()
    }

    /// Nothing scheduled.
    pub fn is_empty(&self) -> bool {
        self.layer_tools.is_empty()
    }

    /// Total number of tool changes, starting from the first tool.
    pub fn toolchange_count(&self) -> usize {
        let mut active = None;
        let mut changes = 0;
        for lt in &self.layer_tools {
            changes += lt.toolchange_count(active);
            active = lt.extruders.last().copied().or(active);
        }
        changes
    }
}

impl<'a> IntoIterator for &'a ToolOrdering {
    type Item = &'a LayerTools;
    type IntoIter = std::slice::Iter<'a, LayerTools>;

    fn into_iter(self) -> Self::IntoIter {
        self.layer_tools.iter()
    }
}

/// Put the tool carried over from below first on every layer and, when the
/// layer has a choice, end with a tool the next layer needs.
fn reorder_layers(layers: &mut [LayerTools], start: u32) {
    let mut last = start;
    for i in 0..layers.len() {
        let next_needed: Option<Vec<u32>> = layers[i + 1..]
            .iter()
            .find(|lt| !lt.extruders.is_empty())
            .map(|lt| lt.extruders.clone());
        let lt = &mut layers[i];

        if lt.extruders.is_empty() {
            if lt.dont_care {
                lt.extruders.push(last);
            }
            continue;
        }

        if let Some(pos) = lt.extruders.iter().position(|&t| t == last) {
            lt.extruders[..=pos].rotate_right(1);
        }

        let head = usize::from(lt.extruders[0] == last);
        if let Some(next) = next_needed {
            if lt.extruders.len() - head > 1 {
                if let Some(pos) = (head..lt.extruders.len()).find(|&k| next.contains(&lt.extruders[k])) {
                    let tool = lt.extruders.remove(pos);
                    lt.extruders.push(tool);
                }
            }
        }

        if let Some(&tail) = lt.extruders.last() {
            last = tail;
        }
    }
}

/// Tool switches over `layers` starting with `start` loaded, and the index
/// of the layer holding the first switch.
fn count_switches(layers: &[LayerTools], start: u32) -> (usize, usize) {
    let mut current = start;
    let mut switches = 0;
    let mut first_switch = None;
    for (i, lt) in layers.iter().enumerate() {
        for &tool in &lt.extruders {
            if tool != current {
                switches += 1;
                first_switch.get_or_insert(i);
                current = tool;
            }
        }
    }
    (switches, first_switch.unwrap_or(layers.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcad_slicer::{EntityId, ExtrusionPath, ExtrusionRole, ObjectLayer, PathSegment};

    fn path(id: u64, tool: u32, role: ExtrusionRole) -> ExtrusionPath {
        ExtrusionPath {
            id: EntityId(id),
            role,
            tool,
            mm3_per_mm: 0.5,
            speed: 40.0,
            start: [0.0, 0.0],
            segments: vec![PathSegment::Line { to: [20.0, 0.0] }],
        }
    }

    /// Object whose layer `i` uses `tools[i]`, 0.2mm thick.
    fn object(tools: &[&[u32]]) -> PrintObject {
        let mut next_id = 0;
        let mut object = PrintObject::new("part");
        object.layers = tools
            .iter()
            .enumerate()
            .map(|(i, layer_tools)| ObjectLayer {
                print_z: 0.2 * (i + 1) as f64,
                height: 0.2,
                paths: layer_tools
                    .iter()
                    .map(|&t| {
                        next_id += 1;
                        path(next_id, t, ExtrusionRole::Perimeter)
                    })
                    .collect(),
            })
            .collect();
        object
    }

    #[test]
    fn test_single_tool_has_no_tower() {
        let ctx = PrintContext::with_tools(1);
        let ordering = ToolOrdering::for_object(&object(&[&[0], &[0], &[0]]), None, &ctx);
        assert_eq!(ordering.len(), 3);
        assert!(ordering.iter().all(|lt| lt.extruders == vec![0]));
        assert!(!ordering.has_wipe_tower());
        assert!(ordering.iter().all(|lt| !lt.has_wipe_tower));
        assert_eq!(ordering.first_extruder(), Some(0));
        assert_eq!(ordering.last_extruder(), Some(0));
    }

    #[test]
    fn test_alternating_layers() {
        let ctx = PrintContext::with_tools(2);
        let ordering =
            ToolOrdering::for_object(&object(&[&[0], &[1], &[0], &[1]]), None, &ctx);
        let plan: Vec<Vec<u32>> = ordering.iter().map(|lt| lt.extruders.clone()).collect();
        assert_eq!(plan, vec![vec![0], vec![1], vec![0], vec![1]]);
        assert_eq!(ordering.toolchange_count(), 3);
        assert!(ordering.has_wipe_tower());
        assert!(ordering.iter().all(|lt| lt.has_wipe_tower));
    }

    #[test]
    fn test_carried_tool_goes_first() {
        let ctx = PrintContext::with_tools(2);
        let ordering = ToolOrdering::for_object(&object(&[&[1], &[0, 1]]), None, &ctx);
        assert_eq!(ordering.layer_tools()[1].extruders, vec![1, 0]);
        assert_eq!(ordering.toolchange_count(), 1);
    }

    #[test]
    fn test_first_tool_minimizes_switches() {
        // Starting on 0 costs a switch per layer; starting on 1 costs one.
        let ctx = PrintContext::with_tools(2);
        let ordering =
            ToolOrdering::for_object(&object(&[&[0, 1], &[0], &[0], &[0]]), None, &ctx);
        assert_eq!(ordering.layer_tools()[0].extruders, vec![1, 0]);
        assert_eq!(ordering.toolchange_count(), 1);
        assert_eq!(ordering.first_extruder(), Some(1));
        assert_eq!(ordering.last_extruder(), Some(0));
    }

    #[test]
    fn test_first_extruder_hint_wins() {
        let ctx = PrintContext::with_tools(2);
        let ordering =
            ToolOrdering::for_object(&object(&[&[0, 1], &[0], &[0]]), Some(0), &ctx);
        assert_eq!(ordering.layer_tools()[0].extruders, vec![0, 1]);
    }

    #[test]
    fn test_look_ahead_orders_tail() {
        // Tool 0 is carried in; of 1 and 2, the next layer only needs 1.
        let ctx = PrintContext::with_tools(3);
        let ordering =
            ToolOrdering::for_object(&object(&[&[0], &[0, 1, 2], &[1]]), Some(0), &ctx);
        assert_eq!(ordering.layer_tools()[1].extruders, vec![0, 2, 1]);
        assert_eq!(ordering.toolchange_count(), 2);
    }

    #[test]
    fn test_partitions_never_increase_with_height() {
        let ctx = PrintContext::with_tools(3);
        let ordering = ToolOrdering::for_object(
            &object(&[&[0], &[0, 1, 2], &[2], &[2], &[2, 0]]),
            Some(0),
            &ctx,
        );
        let partitions: Vec<usize> =
            ordering.iter().map(|lt| lt.wipe_tower_partitions).collect();
        assert!(partitions.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(partitions[0], 2);
        assert_eq!(*partitions.last().unwrap(), 1);
    }

    #[test]
    fn test_heights_merge_within_epsilon() {
        let mut print = Print {
            objects: vec![object(&[&[0], &[0]]), object(&[&[1], &[1]])],
        };
        for layer in &mut print.objects[1].layers {
            layer.print_z += 2e-5;
        }
        for (i, layer) in print.objects[1].layers.iter_mut().enumerate() {
            for p in &mut layer.paths {
                p.id = EntityId(100 + i as u64);
            }
        }
        let ordering = ToolOrdering::for_print(&print, None, &PrintContext::with_tools(2));
        assert_eq!(ordering.len(), 2);
        assert!((ordering.print_zs()[0] - 0.20001).abs() < 1e-9);
        assert!(ordering.tools_for_layer(0.2).is_some());
        assert!(ordering.tools_for_layer(0.3).is_none());
        assert_eq!(ordering.tools_for_layer(0.4).unwrap().extruders.len(), 2);
    }

    #[test]
    fn test_empty_object_gives_empty_schedule() {
        let ordering = ToolOrdering::for_object(
            &PrintObject::new("ghost"),
            None,
            &PrintContext::default(),
        );
        assert!(ordering.is_empty());
        assert_eq!(ordering.first_extruder(), None);
        assert!(!ordering.has_wipe_tower());
        assert_eq!(ordering.toolchange_count(), 0);
    }

    #[test]
    fn test_prime_single_tool_requests_tower() {
        let ctx = PrintContext {
            prime_multi_material: true,
            ..PrintContext::with_tools(1)
        };
        let ordering = ToolOrdering::for_object(&object(&[&[0], &[0]]), None, &ctx);
        assert!(ordering.has_wipe_tower());
        assert!(ordering.front().unwrap().has_wipe_tower);
    }

    #[test]
    fn test_prime_order_puts_first_tool_last() {
        let ctx = PrintContext {
            prime_multi_material: true,
            ..PrintContext::with_tools(3)
        };
        let ordering = ToolOrdering::for_object(&object(&[&[1], &[0, 1, 2]]), None, &ctx);
        assert_eq!(ordering.all_extruders(), &[0, 2, 1]);
        assert_eq!(ordering.first_extruder(), Some(0));
    }

    #[test]
    fn test_dont_care_layer_keeps_active_tool() {
        let mut sacrificial = object(&[&[0], &[0]]);
        sacrificial.wipe_into_objects = true;
        let mut part = object(&[&[1], &[0]]);
        part.layers.truncate(1);
        for p in part.layers.iter_mut().flat_map(|l| &mut l.paths) {
            p.id = EntityId(p.id.0 + 50);
            p.role = ExtrusionRole::Infill;
        }
        let print = Print {
            objects: vec![part, sacrificial],
        };
        let ordering = ToolOrdering::for_print(&print, None, &PrintContext::with_tools(2));
        // Layer 2 has only sacrificial walls: it stays on tool 1.
        assert_eq!(ordering.layer_tools()[1].extruders, vec![1]);
        let lt = &ordering.layer_tools()[1];
        let entity = print.objects[1].layers[1].paths[0].id;
        assert_eq!(lt.wiping_extrusions.extruder_override(entity, 0), Some(1));
    }

    #[test]
    fn test_only_sacrificial_walls_keep_their_tool() {
        let mut sacrificial = object(&[&[1], &[1]]);
        sacrificial.wipe_into_objects = true;
        let print = Print {
            objects: vec![sacrificial],
        };
        let ordering = ToolOrdering::for_print(&print, None, &PrintContext::with_tools(2));
        assert!(ordering.iter().all(|lt| lt.extruders == vec![1]));
        assert_eq!(ordering.first_extruder(), Some(1));
        assert_eq!(ordering.toolchange_count(), 0);
        // Printed on their own tool, nothing to override.
        assert!(ordering
            .iter()
            .all(|lt| !lt.wiping_extrusions.is_anything_overridden()));
    }

    #[test]
    fn test_schedule_is_deterministic() {
        // Several starting tools per layer; scored in parallel.
        let ctx = PrintContext::with_tools(3);
        let part = object(&[&[0, 1], &[0, 1], &[1, 2], &[0, 2]]);
        let mut other = object(&[&[2, 0], &[1, 0], &[2, 1], &[0, 1]]);
        for p in other.layers.iter_mut().flat_map(|l| &mut l.paths) {
            p.id = EntityId(p.id.0 + 100);
        }
        let print = Print {
            objects: vec![part.clone(), other],
        };

        let plan = |ordering: &ToolOrdering| -> (Vec<Vec<u32>>, Vec<usize>) {
            (
                ordering.iter().map(|lt| lt.extruders.clone()).collect(),
                ordering.iter().map(|lt| lt.wipe_tower_partitions).collect(),
            )
        };
        let object_plan = plan(&ToolOrdering::for_object(&part, None, &ctx));
        let print_plan = plan(&ToolOrdering::for_print(&print, None, &ctx));
        for _ in 0..16 {
            assert_eq!(plan(&ToolOrdering::for_object(&part, None, &ctx)), object_plan);
            assert_eq!(plan(&ToolOrdering::for_print(&print, None, &ctx)), print_plan);
        }
    }

    #[test]
    fn test_tied_start_prefers_lowest_tool() {
        let ctx = PrintContext::with_tools(2);
        for _ in 0..8 {
            let ordering = ToolOrdering::for_object(&object(&[&[0, 1], &[0, 1]]), None, &ctx);
            assert_eq!(ordering.first_extruder(), Some(0));
            assert_eq!(ordering.layer_tools()[0].extruders, vec![0, 1]);
        }
    }

    #[test]
    fn test_raft_gap_gets_tower_layer() {
        let mut part = object(&[&[0], &[1]]);
        for layer in &mut part.layers {
            layer.print_z += 0.6;
        }
        part.support_layers = vec![ObjectLayer {
            print_z: 0.3,
            height: 0.3,
            paths: vec![path(99, 0, ExtrusionRole::SupportMaterial)],
        }];
        let mut ctx = PrintContext::with_tools(2);
        ctx.tools[0].max_layer_height = 0.3;
        ctx.tools[1].max_layer_height = 0.3;

        // Raft top 0.3, first object layer 0.8.
        let ordering = ToolOrdering::for_object(&part, None, &ctx);
        let zs = ordering.print_zs();
        assert_eq!(zs.len(), 4);
        assert!((zs[1] - 0.55).abs() < 1e-9);
        let inserted = &ordering.layer_tools()[1];
        assert!(inserted.has_wipe_tower);
        assert!(inserted.extruders.is_empty());
        assert!(ordering.layer_tools()[0].has_wipe_tower);
        assert!((inserted.wipe_tower_layer_height - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_wiping_fills_tower_volume() {
        let mut part = object(&[&[0], &[0]]);
        part.wipe_into_infill = true;
        part.layers[1].paths.push(path(77, 1, ExtrusionRole::Infill));
        let mut ctx = PrintContext::with_tools(2);
        ctx.tools[1].purge_volume = 25.0;
        let print = Print {
            objects: vec![part],
        };
        let ordering = ToolOrdering::for_print(&print, Some(0), &ctx);
        let lt = &ordering.layer_tools()[1];
        // 20mm infill at 0.5 mm³/mm absorbs 10 of 25.
        assert!((lt.wipe_tower_volume - 15.0).abs() < 1e-9);
        assert_eq!(lt.wiping_extrusions.extruder_override(EntityId(77), 0), Some(1));
    }
}
