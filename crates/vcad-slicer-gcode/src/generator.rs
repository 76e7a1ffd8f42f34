//! Print-level G-code generation.
//!
//! [`GcodeGenerator`] schedules the tools of a [`Print`], then walks the
//! schedule layer by layer and drives a [`GcodeWriter`] for every tool
//! change, travel and extrusion.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vcad_slicer::{ExtrusionPath, PathSegment, Print, PrintObject, EPSILON};
use vcad_slicer_toolorder::{LayerTools, PrintContext, ToolOrdering};

use crate::config::GcodeConfig;
use crate::error::{ConfigError, GcodeError, Result};
use crate::line::{format_fixed, XYZF_EXPORT_DIGITS};
use crate::writer::GcodeWriter;

/// Everything needed to turn a print into G-code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcodeSettings {
    /// Machine configuration.
    pub config: GcodeConfig,
    /// Material facts for the tool scheduler.
    #[serde(default)]
    pub context: PrintContext,
    /// Tool loaded before the print starts.
    #[serde(default)]
    pub first_extruder: Option<u32>,
    /// Print each object to completion before starting the next.
    #[serde(default)]
    pub complete_objects: bool,
}

impl GcodeSettings {
    /// Settings for `config` with a default context.
    pub fn new(config: GcodeConfig) -> Self {
        let context = PrintContext::with_tools(config.extruders.len());
        Self {
            config,
            context,
            first_extruder: None,
            complete_objects: false,
        }
    }

    /// Parse a TOML document and validate the machine configuration.
    pub fn from_toml_str(s: &str) -> std::result::Result<Self, ConfigError> {
        let settings: Self = toml::from_str(s)?;
        settings.config.validate()?;
        Ok(settings)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

/// One printing pass: a tool schedule and the objects it covers.
struct Pass {
    objects: Vec<usize>,
    ordering: ToolOrdering,
}

/// G-code generator for a whole print.
pub struct GcodeGenerator<'a> {
    settings: &'a GcodeSettings,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> GcodeGenerator<'a> {
    /// Create a generator, rejecting invalid machine settings up front.
    pub fn new(settings: &'a GcodeSettings) -> Result<Self> {
        settings.config.validate()?;
        Ok(Self {
            settings,
            cancel: None,
        })
    }

    /// Stop between layers once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Tool schedules of the print, one per printing pass.
    pub fn schedule(&self, print: &Print) -> Vec<ToolOrdering> {
        self.passes(print).into_iter().map(|p| p.ordering).collect()
    }

    fn passes(&self, print: &Print) -> Vec<Pass> {
        let ctx = &self.settings.context;
        if !self.settings.complete_objects {
            return vec![Pass {
                objects: (0..print.objects.len()).collect(),
                ordering: ToolOrdering::for_print(print, self.settings.first_extruder, ctx),
            }];
        }
        let mut last = self.settings.first_extruder;
        print
            .objects
            .iter()
            .enumerate()
            .map(|(index, object)| {
                let ordering = ToolOrdering::for_object(object, last, ctx);
                last = ordering.last_extruder().or(last);
                Pass {
                    objects: vec![index],
                    ordering,
                }
            })
            .collect()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Generate the complete program.
    pub fn generate(&self, print: &Print) -> Result<String> {
        print.validate()?;
        let config = &self.settings.config;
        let mut writer = GcodeWriter::new(config.clone())?;

        let passes = self.passes(print);
        // Scheduled tools may differ from the nominal ones: a loaded tool
        // carried into a layer of sacrificial walls prints them.
        let scheduled = passes
            .iter()
            .flat_map(|p| p.ordering.all_extruders().iter().copied());
        writer.set_extruders(print.tool_ids().into_iter().chain(scheduled))?;
        let total_layers: usize = passes.iter().map(|p| p.ordering.len()).sum();
        info!(
            objects = print.objects.len(),
            layers = total_layers,
            passes = passes.len(),
            flavor = %config.flavor,
            "generating G-code"
        );

        let mut gcode = String::new();
        gcode += &format!("; generated by vcad-slicer {}\n", env!("CARGO_PKG_VERSION"));
        gcode += &self.emit_header(&mut writer, passes.first().map(|p| &p.ordering))?;

        let mut done = 0;
        for (pass_index, pass) in passes.iter().enumerate() {
            if pass_index > 0 {
                gcode += &self.emit_between_objects(&mut writer, print, pass);
            }
            for (layer_index, layer) in pass.ordering.iter().enumerate() {
                if self.is_cancelled() {
                    warn!(print_z = layer.print_z, "G-code generation cancelled");
                    return Err(GcodeError::Cancelled {
                        print_z: layer.print_z,
                    });
                }
                gcode += &writer.update_progress(done as u32, total_layers as u32, false);
                gcode += &self.emit_layer(&mut writer, print, &pass.objects, layer, layer_index);
                done += 1;
            }
        }

        gcode += &self.emit_footer(&mut writer);
        info!(bytes = gcode.len(), "G-code generated");
        Ok(gcode)
    }

    fn emit_header(
        &self,
        writer: &mut GcodeWriter,
        ordering: Option<&ToolOrdering>,
    ) -> Result<String> {
        let config = &self.settings.config;
        let mut gcode = writer.preamble();
        gcode += &config.start_gcode;
        if !config.start_gcode.is_empty() && !config.start_gcode.ends_with('\n') {
            gcode.push('\n');
        }
        if config.bed_temperature > 0 {
            gcode += &writer.set_bed_temperature(config.bed_temperature, true);
        }

        let priming = self.settings.context.prime_multi_material
            && ordering.is_some_and(ToolOrdering::has_wipe_tower);
        let first = ordering.and_then(ToolOrdering::first_extruder);
        if let Some(first) = first {
            for id in writer.extruder_ids() {
                let temperature = config.extruder(id)?.temperature;
                gcode += &writer.set_temperature(temperature, priming || id == first, Some(id));
            }
        }
        gcode += &writer.set_acceleration(config.default_acceleration);

        match (ordering, first) {
            // The tool printing first is primed last and stays loaded.
            (Some(ordering), _) if priming => {
                for &tool in ordering.all_extruders() {
                    gcode += &writer.set_extruder(tool);
                    gcode += &format!("; PRIME T{tool}\n");
                }
            }
            (_, Some(first)) => gcode += &writer.set_extruder(first),
            _ => {}
        }
        Ok(gcode)
    }

    fn emit_between_objects(&self, writer: &mut GcodeWriter, print: &Print, pass: &Pass) -> String {
        let mut gcode = writer.retract(false);
        // Cross over at the height of the finished object.
        let start = pass.objects.iter().find_map(|&i| first_point(&print.objects[i]));
        if let Some(start) = start {
            gcode += &writer.travel_to_xy(start, "move to next object");
        }
        gcode
    }

    fn emit_layer(
        &self,
        writer: &mut GcodeWriter,
        print: &Print,
        objects: &[usize],
        layer: &LayerTools,
        layer_index: usize,
    ) -> String {
        let config = &self.settings.config;
        debug!(print_z = layer.print_z, tools = ?layer.extruders, "layer");

        let mut gcode = String::new();
        gcode += ";LAYER_CHANGE\n";
        gcode += &format!(";Z:{}\n", format_fixed(layer.print_z, XYZF_EXPORT_DIGITS));
        gcode += &writer.travel_to_z(layer.print_z, "move to next layer");

        let fan = if layer_index < config.disable_fan_first_layers {
            0
        } else {
            config.fan_speed
        };
        if writer.last_fan_speed() != Some(fan) {
            gcode += &writer.set_fan(fan);
        }

        if layer.has_wipe_tower && layer.wipe_tower_volume > 0.0 {
            gcode += &format!(
                "; wipe tower volume {} mm3\n",
                format_fixed(layer.wipe_tower_volume, XYZF_EXPORT_DIGITS)
            );
        }

        for &tool in &layer.extruders {
            if writer.need_toolchange(tool) {
                let previous = writer.extruder().map(|e| e.id());
                gcode += &writer.retract_for_toolchange(false);
                gcode += &writer.toolchange(tool);
                if layer.has_wipe_tower {
                    let volume = previous.map_or(0.0, |from| {
                        self.settings.context.purge_volume(from, tool)
                    });
                    gcode += &format!(
                        "; PURGE T{tool} {} mm3\n",
                        format_fixed(volume, XYZF_EXPORT_DIGITS)
                    );
                }
            }
            for &index in objects {
                gcode += &self.emit_object(writer, &print.objects[index], layer, tool);
            }
        }
        gcode
    }

    /// Everything `tool` prints of one object on this layer. Copies wiping
    /// a tool change go first so the purge happens right after it.
    fn emit_object(
        &self,
        writer: &mut GcodeWriter,
        object: &PrintObject,
        layer: &LayerTools,
        tool: u32,
    ) -> String {
        let paths: Vec<&ExtrusionPath> = object
            .support_layer_at(layer.print_z)
            .into_iter()
            .chain(object.layer_at(layer.print_z))
            .flat_map(|l| &l.paths)
            .collect();
        let num_copies = object.copies.len();
        let wiping = &layer.wiping_extrusions;

        let mut gcode = String::new();
        for wipe in [true, false] {
            for copy in 0..num_copies {
                let offset = object.copy_offset(copy);
                for path in &paths {
                    let prints = match wiping.extruder_override(path.id, copy) {
                        Some(t) => wipe && t == tool,
                        None => !wipe && path.tool == tool,
                    };
                    if prints {
                        gcode += &self.emit_path(writer, path, offset);
                    }
                }
            }
        }
        gcode
    }

    /// One path of the copy placed at `offset`.
    fn emit_path(&self, writer: &mut GcodeWriter, path: &ExtrusionPath, offset: Vector2<f64>) -> String {
        let config = &self.settings.config;
        let start = path.start_point().coords + offset;
        let mut gcode = String::new();

        let known = writer.is_position_known();
        let distance = (start - writer.position().xy()).norm();
        if !known || distance > EPSILON {
            if known && distance > config.retract_before_travel {
                gcode += &writer.retract(false);
                gcode += &writer.lift(config.z_hop_type);
            }
            gcode += &writer.set_acceleration(config.travel_acceleration);
            gcode += &writer.travel_to_xy(start, "move to first point");
            gcode += &writer.unlift();
        }
        gcode += &writer.unretract();
        gcode += &writer.set_acceleration(config.default_acceleration);
        gcode += &writer.set_speed(path.speed * 60.0, "", "");

        let e_per_mm3 = writer.extruder().map_or(0.0, |e| e.e_per_mm3());
        let mut from = path.start_point();
        for segment in &path.segments {
            let de = segment.length_from(from) * path.mm3_per_mm * e_per_mm3;
            let end = segment.end();
            let to = end.coords + offset;
            gcode += &match *segment {
                PathSegment::Line { .. } => writer.extrude_to_xy(to, de, "", false),
                PathSegment::Arc {
                    center, direction, ..
                } => {
                    let center_offset = Vector2::new(center[0] - from.x, center[1] - from.y);
                    writer.extrude_arc_to_xy(to, center_offset, de, direction, "", false)
                }
            };
            from = end;
        }
        gcode
    }

    fn emit_footer(&self, writer: &mut GcodeWriter) -> String {
        let config = &self.settings.config;
        let mut gcode = writer.retract(false);
        gcode += &writer.set_fan(0);
        for id in writer.extruder_ids() {
            gcode += &writer.set_temperature(0, false, Some(id));
        }
        if config.bed_temperature > 0 {
            gcode += &writer.set_bed_temperature(0, false);
        }
        gcode += &config.end_gcode;
        if !config.end_gcode.is_empty() && !config.end_gcode.ends_with('\n') {
            gcode.push('\n');
        }
        gcode += &writer.postamble();
        for extruder in writer.extruders() {
            gcode += &format!(
                "; filament used T{} = {}mm ({}cm3)\n",
                extruder.id(),
                format_fixed(extruder.used_filament(), 2),
                format_fixed(extruder.extruded_volume() / 1000.0, 2)
            );
        }
        gcode
    }
}

fn first_point(object: &PrintObject) -> Option<Vector2<f64>> {
    let path = object
        .support_layers
        .iter()
        .chain(&object.layers)
        .flat_map(|l| &l.paths)
        .next()?;
    Some(path.start_point().coords + object.copy_offset(0))
}

/// Generate G-code for `print` in one call.
pub fn generate_gcode(print: &Print, settings: &GcodeSettings) -> Result<String> {
    GcodeGenerator::new(settings)?.generate(print)
}
