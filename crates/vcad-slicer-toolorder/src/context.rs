//! Per-print material and machine facts the scheduler needs.

use serde::{Deserialize, Serialize};

/// Material properties of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolProperties {
    /// Nozzle diameter (mm).
    pub nozzle_diameter: f64,
    /// Thickest layer the tool can print (mm). Zero derives it from the nozzle.
    pub max_layer_height: f64,
    /// Filament dissolves; never used for purging.
    pub soluble: bool,
    /// Material to purge when switching to this tool (mm³).
    pub purge_volume: f64,
}

impl Default for ToolProperties {
    fn default() -> Self {
        Self {
            nozzle_diameter: 0.4,
            max_layer_height: 0.0,
            soluble: false,
            purge_volume: 70.0,
        }
    }
}

impl ToolProperties {
    /// Max layer height with the nozzle-derived fallback applied.
    pub fn effective_max_layer_height(&self) -> f64 {
        if self.max_layer_height > 0.0 {
            self.max_layer_height
        } else {
            0.75 * self.nozzle_diameter
        }
    }
}

/// Read-only context built once per print and shared by reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintContext {
    /// Properties indexed by tool id. Missing ids fall back to defaults.
    pub tools: Vec<ToolProperties>,
    /// Prime every tool on the wipe tower before the first layer.
    pub prime_multi_material: bool,
    /// Infill is printed before perimeters.
    pub infill_first: bool,
}

impl PrintContext {
    /// Context for `count` tools with default properties.
    pub fn with_tools(count: usize) -> Self {
        Self {
            tools: vec![ToolProperties::default(); count],
            ..Default::default()
        }
    }

    /// Properties of tool `id`, or defaults for an unknown tool.
    pub fn tool(&self, id: u32) -> ToolProperties {
        self.tools.get(id as usize).cloned().unwrap_or_default()
    }

    /// Whether tool `id` prints dissolvable material.
    pub fn is_soluble(&self, id: u32) -> bool {
        self.tools.get(id as usize).is_some_and(|t| t.soluble)
    }

    /// Volume to purge when switching from `_from` to `to` (mm³).
    pub fn purge_volume(&self, _from: u32, to: u32) -> f64 {
        self.tool(to).purge_volume
    }

    /// Thickest layer every tool can print; infinite without tools.
    pub fn max_layer_height(&self) -> f64 {
        self.tools
            .iter()
            .map(ToolProperties::effective_max_layer_height)
            .fold(f64::INFINITY, f64::min)
    }
}
