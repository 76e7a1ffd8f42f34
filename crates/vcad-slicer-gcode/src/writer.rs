//! Stateful G-code writer.
//!
//! [`GcodeWriter`] knows where the machine is, which tool is loaded and
//! what speed, acceleration and bed temperature were last commanded. Every
//! operation returns the text it wants emitted, which is empty when the
//! machine is already in the requested state.

use std::f64::consts::PI;

use nalgebra::{Vector2, Vector3};
use tracing::debug;
use vcad_slicer::{ArcDirection, EPSILON};

use crate::config::{GcodeConfig, LiftType};
use crate::error::ConfigError;
use crate::extruder::Extruder;
use crate::flavor::GcodeFlavor;
use crate::line::{format_fixed, GcodeLine, LineKind, XYZF_EXPORT_DIGITS};

/// Steepest climb a lazy lift may spread along a travel (radians).
const SLOPE_THRESHOLD: f64 = 3.0 * PI / 180.0;

/// Where the nozzle stands relative to the layer it prints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiftState {
    /// At the nominal Z.
    Down,
    /// Requested; the next travel climbs.
    Pending {
        /// Lift height (mm).
        amount: f64,
        /// How the travel climbs.
        kind: LiftType,
    },
    /// Raised above the nominal Z.
    Lifted {
        /// Lift height (mm).
        amount: f64,
        /// How it was raised.
        kind: LiftType,
    },
}

/// Fan command for `speed` percent, independent of any writer state.
///
/// Speeds above 100 are clamped. Safe to call from any thread.
pub fn fan_command(flavor: GcodeFlavor, speed: u32) -> String {
    let speed = speed.min(100);
    if speed == 0 {
        let code = match flavor {
            GcodeFlavor::Teacup => "M106 S0",
            GcodeFlavor::MakerWare | GcodeFlavor::Sailfish => "M127",
            _ => "M107",
        };
        return format!("{code} ; fan off\n");
    }
    if flavor.is_makerbot() {
        return "M126 ; enable fan\n".into();
    }
    let letter = if flavor.uses_p_parameter() { 'P' } else { 'S' };
    let value = format_fixed(255.0 * f64::from(speed) / 100.0, XYZF_EXPORT_DIGITS);
    format!("M106 {letter}{value} ; enable fan\n")
}

/// Machine state tracker producing G-code.
pub struct GcodeWriter {
    config: GcodeConfig,
    extruders: Vec<Extruder>,
    current: Option<usize>,
    multiple_extruders: bool,
    last_acceleration: u32,
    last_bed_temperature: Option<u32>,
    last_bed_temperature_reached: bool,
    last_fan_speed: Option<u32>,
    last_feedrate: Option<f64>,
    lifted: f64,
    lift_kind: LiftType,
    to_lift: f64,
    to_lift_kind: LiftType,
    pos: Vector3<f64>,
    xy_known: bool,
    z_known: bool,
    xy_offset: Vector2<f64>,
}

impl GcodeWriter {
    /// Writer for a validated configuration.
    pub fn new(config: GcodeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let xy_offset = Vector2::new(config.xy_offset[0], config.xy_offset[1]);
        Ok(Self {
            config,
            extruders: Vec::new(),
            current: None,
            multiple_extruders: false,
            last_acceleration: 0,
            last_bed_temperature: None,
            last_bed_temperature_reached: true,
            last_fan_speed: None,
            last_feedrate: None,
            lifted: 0.0,
            lift_kind: LiftType::Normal,
            to_lift: 0.0,
            to_lift_kind: LiftType::Normal,
            pos: Vector3::zeros(),
            xy_known: false,
            z_known: false,
            xy_offset,
        })
    }

    /// Machine configuration.
    pub fn config(&self) -> &GcodeConfig {
        &self.config
    }

    /// Register the tools of this pass. Ids are sorted and deduplicated.
    pub fn set_extruders(&mut self, ids: impl IntoIterator<Item = u32>) -> Result<(), ConfigError> {
        let mut ids: Vec<u32> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        let mut extruders = Vec::with_capacity(ids.len());
        for &id in &ids {
            extruders.push(Extruder::new(
                id,
                self.config.extruder(id)?.clone(),
                self.config.use_relative_e_distances,
                self.config.use_volumetric_e,
            ));
        }
        self.extruders = extruders;
        self.current = None;
        self.multiple_extruders = ids.last().is_some_and(|&max| max > 0);
        Ok(())
    }

    /// Registered tools, by ascending id.
    pub fn extruders(&self) -> &[Extruder] {
        &self.extruders
    }

    /// Registered tool ids.
    pub fn extruder_ids(&self) -> Vec<u32> {
        self.extruders.iter().map(Extruder::id).collect()
    }

    /// Loaded tool.
    pub fn extruder(&self) -> Option<&Extruder> {
        self.current.map(|i| &self.extruders[i])
    }

    /// More than one tool head is in play.
    pub fn multiple_extruders(&self) -> bool {
        self.multiple_extruders
    }

    /// Last commanded position, without the XY offset.
    pub fn position(&self) -> Vector3<f64> {
        self.pos
    }

    /// XY and Z have both been commanded at least once.
    pub fn is_position_known(&self) -> bool {
        self.xy_known && self.z_known
    }

    /// Offset added to every emitted XY coordinate.
    pub fn set_xy_offset(&mut self, offset: Vector2<f64>) {
        self.xy_offset = offset;
    }

    /// Current XY offset.
    pub fn xy_offset(&self) -> Vector2<f64> {
        self.xy_offset
    }

    /// Last fan speed set through [`GcodeWriter::set_fan`].
    pub fn last_fan_speed(&self) -> Option<u32> {
        self.last_fan_speed
    }

    /// Current lift.
    pub fn lift_state(&self) -> LiftState {
        if self.lifted > 0.0 {
            LiftState::Lifted {
                amount: self.lifted,
                kind: self.lift_kind,
            }
        } else if self.to_lift > 0.0 {
            LiftState::Pending {
                amount: self.to_lift,
                kind: self.to_lift_kind,
            }
        } else {
            LiftState::Down
        }
    }

    fn comment(&self, text: &str) -> String {
        if self.config.gcode_comments && !text.is_empty() {
            format!(" ; {text}")
        } else {
            String::new()
        }
    }

    fn flavor(&self) -> GcodeFlavor {
        self.config.flavor
    }

    fn active_extruder_mut(&mut self) -> &mut Extruder {
        match self.current {
            Some(i) => &mut self.extruders[i],
            None => panic!("extrusion requested with no tool selected"),
        }
    }

    /// Units, positioning and extrusion mode setup.
    pub fn preamble(&mut self) -> String {
        let mut gcode = String::new();
        if self.flavor() != GcodeFlavor::MakerWare {
            gcode += &format!("G21{}\n", self.comment("set units to millimeters"));
            gcode += &format!("G90{}\n", self.comment("use absolute coordinates"));
        }
        if self.flavor().supports_extrusion_mode() {
            if self.config.use_relative_e_distances {
                gcode += &format!("M83{}\n", self.comment("use relative distances for extrusion"));
            } else {
                gcode += &format!("M82{}\n", self.comment("use absolute distances for extrusion"));
            }
            gcode += &self.reset_e(true);
        }
        gcode
    }

    /// End-of-program marker where the flavor needs one.
    pub fn postamble(&self) -> String {
        if self.flavor() == GcodeFlavor::Machinekit {
            format!("M2{}\n", self.comment("end of program"))
        } else {
            String::new()
        }
    }

    /// Nozzle temperature, optionally for a tool other than the loaded one.
    pub fn set_temperature(&self, temperature: u32, wait: bool, tool: Option<u32>) -> String {
        let flavor = self.flavor();
        if wait && flavor.is_makerbot() {
            return String::new();
        }
        let (code, comment) = if wait
            && flavor != GcodeFlavor::Teacup
            && flavor != GcodeFlavor::RepRapFirmware
        {
            ("M109", "set temperature and wait for it to be reached")
        } else if flavor == GcodeFlavor::RepRapFirmware {
            ("G10", "set temperature")
        } else {
            ("M104", "set temperature")
        };
        let letter = if flavor.uses_p_parameter() { 'P' } else { 'S' };
        let mut gcode = format!("{code} {letter}{temperature}");
        if let Some(tool) = tool {
            if self.multiple_extruders || flavor.is_makerbot() {
                let tool_letter = if flavor == GcodeFlavor::RepRapFirmware { 'P' } else { 'T' };
                gcode += &format!(" {tool_letter}{tool}");
            }
        }
        gcode += &self.comment(comment);
        gcode.push('\n');
        if wait && matches!(flavor, GcodeFlavor::Teacup | GcodeFlavor::RepRapFirmware) {
            gcode += &format!("M116{}\n", self.comment("wait for temperature to be reached"));
        }
        gcode
    }

    /// Bed temperature. Repeats are dropped unless a wait is newly requested.
    pub fn set_bed_temperature(&mut self, temperature: u32, wait: bool) -> String {
        if self.last_bed_temperature == Some(temperature)
            && (!wait || self.last_bed_temperature_reached)
        {
            return String::new();
        }
        self.last_bed_temperature = Some(temperature);
        self.last_bed_temperature_reached = wait;

        let flavor = self.flavor();
        let (code, comment) = if wait && flavor != GcodeFlavor::Teacup {
            let code = if flavor.is_makerbot() { "M109" } else { "M190" };
            (code, "set bed temperature and wait for it to be reached")
        } else {
            ("M140", "set bed temperature")
        };
        let letter = if flavor.uses_p_parameter() { 'P' } else { 'S' };
        let mut gcode = format!("{code} {letter}{temperature}{}\n", self.comment(comment));
        if wait && flavor == GcodeFlavor::Teacup {
            gcode += &format!("M116{}\n", self.comment("wait for bed temperature to be reached"));
        }
        gcode
    }

    /// Print acceleration, clamped to the configured ceiling.
    pub fn set_acceleration(&mut self, acceleration: u32) -> String {
        let max = self.config.max_acceleration;
        let acceleration = if max > 0 { acceleration.min(max) } else { acceleration };
        if acceleration == 0 || acceleration == self.last_acceleration {
            return String::new();
        }
        self.last_acceleration = acceleration;

        match self.flavor() {
            GcodeFlavor::Repetier => format!(
                "M201 X{a} Y{a}{}\nM202 X{a} Y{a}{}\n",
                self.comment("adjust acceleration"),
                self.comment("adjust travel acceleration"),
                a = acceleration
            ),
            GcodeFlavor::RepRapFirmware | GcodeFlavor::MarlinFirmware => format!(
                "M204 P{acceleration}{}\n",
                self.comment("adjust acceleration")
            ),
            _ => format!(
                "M204 S{acceleration}{}\n",
                self.comment("adjust acceleration")
            ),
        }
    }

    /// Zero the E axis. Without `force`, only when E is not already zero.
    pub fn reset_e(&mut self, force: bool) -> String {
        if !self.flavor().supports_e_reset() {
            return String::new();
        }
        if let Some(i) = self.current {
            let extruder = &mut self.extruders[i];
            if extruder.e() == 0.0 && !force {
                return String::new();
            }
            extruder.reset_e();
        }
        if self.flavor().emits_extrusion() && !self.config.use_relative_e_distances {
            format!("G92 E0{}\n", self.comment("reset extrusion distance"))
        } else {
            String::new()
        }
    }

    /// Progress report for printers that display one.
    pub fn update_progress(&self, num: u32, total: u32, allow_100: bool) -> String {
        if !self.flavor().is_makerbot() || total == 0 {
            return String::new();
        }
        let mut percent = (100.0 * f64::from(num) / f64::from(total)).floor() as u32;
        if !allow_100 {
            percent = percent.min(99);
        }
        format!("M73 P{percent}{}\n", self.comment("update progress"))
    }

    /// Text in front of the tool number of a tool select.
    pub fn toolchange_prefix(&self) -> &'static str {
        self.flavor().toolchange_prefix()
    }

    /// Whether selecting `id` would change anything.
    pub fn need_toolchange(&self, id: u32) -> bool {
        self.extruder().map_or(true, |e| e.id() != id)
    }

    /// Select `id` unless it is already loaded.
    pub fn set_extruder(&mut self, id: u32) -> String {
        if !self.need_toolchange(id) {
            return String::new();
        }
        self.toolchange(id)
    }

    /// Select `id` unconditionally.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not registered with [`GcodeWriter::set_extruders`].
    pub fn toolchange(&mut self, id: u32) -> String {
        let index = match self.extruders.binary_search_by_key(&id, Extruder::id) {
            Ok(index) => index,
            Err(_) => panic!("tool {id} was not registered with the writer"),
        };
        self.current = Some(index);
        debug!(tool = id, "tool change");

        if !self.multiple_extruders {
            return String::new();
        }
        let mut gcode = format!(
            "{}{id}{}\n",
            self.toolchange_prefix(),
            self.comment("change extruder")
        );
        gcode += &self.reset_e(true);
        gcode
    }

    /// Feed rate (mm/min). Dropped when unchanged, unless a marker rides on it.
    pub fn set_speed(&mut self, f: f64, comment: &str, cooling_marker: &str) -> String {
        debug_assert!(f > 0.0 && f < 100_000.0, "feed rate out of range: {f}");
        if cooling_marker.is_empty() && self.last_feedrate.is_some_and(|last| same_feedrate(last, f)) {
            return String::new();
        }
        let mut line = GcodeLine::linear();
        line.emit_f(f);
        line.emit_comment(self.config.gcode_comments, comment);
        line.emit_str(cooling_marker);
        self.last_feedrate = Some(f);
        line.finish()
    }

    fn travel_feedrate(&self) -> f64 {
        self.config.travel_speed * 60.0
    }

    fn travel_z_feedrate(&self) -> f64 {
        let speed = if self.config.travel_speed_z > 0.0 {
            self.config.travel_speed_z
        } else {
            self.config.travel_speed
        };
        speed * 60.0
    }

    /// Travel in XY. A pending lift is realized on the way.
    pub fn travel_to_xy(&mut self, point: Vector2<f64>, comment: &str) -> String {
        if self.to_lift > EPSILON {
            let nominal = self.pos.z - self.lifted;
            return self.travel_to_xyz(Vector3::new(point.x, point.y, nominal), comment);
        }
        self.pos.x = point.x;
        self.pos.y = point.y;
        self.xy_known = true;

        let f = self.travel_feedrate();
        let mut line = GcodeLine::linear();
        line.emit_xy(point + self.xy_offset);
        line.emit_f(f);
        line.emit_comment(self.config.gcode_comments, comment);
        self.last_feedrate = Some(f);
        line.finish()
    }

    /// Travel in XYZ. A pending lift is realized before or during the move.
    pub fn travel_to_xyz(&mut self, point: Vector3<f64>, comment: &str) -> String {
        if self.clamped_lift(point.z) > EPSILON {
            return self.lifted_travel(point, comment);
        }
        // A pending lift with no room under the ceiling is dropped.
        self.to_lift = 0.0;
        if !self.will_move_z(point.z) {
            self.absorb_z(point.z);
            return self.travel_to_xy(point.xy(), comment);
        }
        self.lifted = 0.0;
        self.travel_line(point, true, comment)
    }

    /// Travel in Z only.
    pub fn travel_to_z(&mut self, z: f64, comment: &str) -> String {
        let lift = self.clamped_lift(z);
        self.to_lift = 0.0;
        if lift > EPSILON {
            let target = z + lift;
            self.lifted = lift;
            self.lift_kind = self.to_lift_kind;
            if self.z_known && (target - self.pos.z).abs() < EPSILON {
                return String::new();
            }
            return self.raw_travel_to_z(target, comment);
        }
        if !self.will_move_z(z) {
            self.absorb_z(z);
            return String::new();
        }
        self.lifted = 0.0;
        self.raw_travel_to_z(z, comment)
    }

    /// Whether commanding `z` would move the nozzle.
    ///
    /// While lifted, any Z between the nominal height and the current one
    /// is reached by lowering the recorded lift instead.
    pub fn will_move_z(&self, z: f64) -> bool {
        if !self.z_known {
            return true;
        }
        if self.lifted > 0.0 {
            let nominal = self.pos.z - self.lifted;
            if z >= nominal - EPSILON && z <= self.pos.z + EPSILON {
                return false;
            }
        }
        (z - self.pos.z).abs() > EPSILON
    }

    /// Re-base the lift so that `z` becomes the nominal height.
    fn absorb_z(&mut self, z: f64) {
        let nominal = self.pos.z - self.lifted;
        self.lifted -= z - nominal;
        if self.lifted.abs() < EPSILON {
            self.lifted = 0.0;
        }
    }

    /// Pending lift above a nominal `z`, kept under the printable height.
    fn clamped_lift(&self, z: f64) -> f64 {
        if self.to_lift <= EPSILON {
            0.0
        } else if self.config.printable_height > 0.0 {
            self.to_lift.min(self.config.printable_height - z).max(0.0)
        } else {
            self.to_lift
        }
    }

    fn lifted_travel(&mut self, point: Vector3<f64>, comment: &str) -> String {
        let kind = self.to_lift_kind;
        let lift = self.clamped_lift(point.z);
        let target = Vector3::new(point.x, point.y, point.z + lift);
        let delta_xy = target.xy() - self.pos.xy();
        let dz = target.z - self.pos.z;
        let has_travel = self.xy_known && delta_xy.norm() > EPSILON;

        let mut gcode = String::new();
        if dz > EPSILON || !self.z_known {
            match kind {
                LiftType::Spiral if has_travel && self.z_known => {
                    let radius = dz / (2.0 * PI * SLOPE_THRESHOLD.atan());
                    let along = delta_xy.normalize() * radius;
                    let ij = Vector2::new(-along.y, along.x);
                    gcode += &self.spiral_travel_to_z(target.z, ij, "spiral lift Z");
                }
                LiftType::Lazy if has_travel && self.z_known => {
                    if dz.atan2(delta_xy.norm()) < SLOPE_THRESHOLD {
                        let top = self.pos.xy() + delta_xy.normalize() * (dz / SLOPE_THRESHOLD.tan());
                        gcode += &self.travel_line(
                            Vector3::new(top.x, top.y, target.z),
                            true,
                            "slope lift Z",
                        );
                    }
                }
                _ => gcode += &self.raw_travel_to_z(target.z, "lift Z"),
            }
        }

        let moves_z = (target.z - self.pos.z).abs() > EPSILON;
        gcode += &self.travel_line(target, moves_z, comment);
        self.lifted = lift;
        self.lift_kind = kind;
        self.to_lift = 0.0;
        debug!(amount = self.lifted, ?kind, "lift realized");
        gcode
    }

    fn travel_line(&mut self, point: Vector3<f64>, with_z: bool, comment: &str) -> String {
        let f = self.travel_feedrate();
        let mut line = GcodeLine::linear();
        if with_z {
            line.emit_xyz(Vector3::new(
                point.x + self.xy_offset.x,
                point.y + self.xy_offset.y,
                point.z,
            ));
            self.z_known = true;
        } else {
            line.emit_xy(point.xy() + self.xy_offset);
        }
        line.emit_f(f);
        line.emit_comment(self.config.gcode_comments, comment);
        self.pos = point;
        self.xy_known = true;
        self.last_feedrate = Some(f);
        line.finish()
    }

    fn raw_travel_to_z(&mut self, z: f64, comment: &str) -> String {
        self.pos.z = z;
        self.z_known = true;
        let f = self.travel_z_feedrate();
        let mut line = GcodeLine::linear();
        line.emit_z(z);
        line.emit_f(f);
        line.emit_comment(self.config.gcode_comments, comment);
        self.last_feedrate = Some(f);
        line.finish()
    }

    fn spiral_travel_to_z(&mut self, z: f64, ij: Vector2<f64>, comment: &str) -> String {
        self.pos.z = z;
        self.z_known = true;
        let f = self.travel_z_feedrate();
        let mut line = GcodeLine::new(LineKind::ArcCcw);
        line.emit_z(z);
        line.emit_ij(ij);
        line.emit_str(" P1");
        line.emit_f(f);
        line.emit_comment(self.config.gcode_comments, comment);
        self.last_feedrate = Some(f);
        format!("G17\n{}", line.finish())
    }

    fn emit_extrusion(&mut self, line: &mut GcodeLine, de: f64) {
        let extruder = self.active_extruder_mut();
        extruder.extrude(de);
        let e = extruder.e();
        if self.flavor().emits_extrusion() {
            line.emit_e(e);
        }
    }

    /// Extruding move in XY.
    ///
    /// # Panics
    ///
    /// Panics if material is requested with no tool selected.
    pub fn extrude_to_xy(
        &mut self,
        point: Vector2<f64>,
        de: f64,
        comment: &str,
        force_no_extrusion: bool,
    ) -> String {
        self.pos.x = point.x;
        self.pos.y = point.y;
        self.xy_known = true;
        let mut line = GcodeLine::linear();
        line.emit_xy(point + self.xy_offset);
        if !force_no_extrusion && de.abs() > f64::EPSILON {
            self.emit_extrusion(&mut line, de);
        }
        line.emit_comment(self.config.gcode_comments, comment);
        line.finish()
    }

    /// Extruding arc in XY around `center_offset` (relative to the start).
    pub fn extrude_arc_to_xy(
        &mut self,
        point: Vector2<f64>,
        center_offset: Vector2<f64>,
        de: f64,
        direction: ArcDirection,
        comment: &str,
        force_no_extrusion: bool,
    ) -> String {
        self.pos.x = point.x;
        self.pos.y = point.y;
        self.xy_known = true;
        let mut line = GcodeLine::new(LineKind::from(direction));
        line.emit_xy(point + self.xy_offset);
        line.emit_ij(center_offset);
        if !force_no_extrusion && de.abs() > f64::EPSILON {
            self.emit_extrusion(&mut line, de);
        }
        line.emit_comment(self.config.gcode_comments, comment);
        line.finish()
    }

    /// Extruding move in XYZ. Clears any lift.
    pub fn extrude_to_xyz(
        &mut self,
        point: Vector3<f64>,
        de: f64,
        comment: &str,
        force_no_extrusion: bool,
    ) -> String {
        self.pos = point;
        self.xy_known = true;
        self.z_known = true;
        self.lifted = 0.0;
        let mut line = GcodeLine::linear();
        line.emit_xyz(Vector3::new(
            point.x + self.xy_offset.x,
            point.y + self.xy_offset.y,
            point.z,
        ));
        if !force_no_extrusion && de.abs() > f64::EPSILON {
            self.emit_extrusion(&mut line, de);
        }
        line.emit_comment(self.config.gcode_comments, comment);
        line.finish()
    }

    /// Travel retraction. `before_wipe` retracts only the pre-wipe share.
    pub fn retract(&mut self, before_wipe: bool) -> String {
        let Some(extruder) = self.extruder() else {
            return String::new();
        };
        let config = extruder.config();
        let factor = if before_wipe { config.retract_before_wipe } else { 1.0 };
        let (length, extra) = (config.retract_length, config.retract_restart_extra);
        self.retract_by(length * factor, extra * factor, "retract")
    }

    /// Retraction ahead of a tool change.
    pub fn retract_for_toolchange(&mut self, before_wipe: bool) -> String {
        let Some(extruder) = self.extruder() else {
            return String::new();
        };
        let config = extruder.config();
        let factor = if before_wipe { config.retract_before_wipe } else { 1.0 };
        let (length, extra) = (
            config.retract_length_toolchange,
            config.retract_restart_extra_toolchange,
        );
        self.retract_by(length * factor, extra * factor, "retract for toolchange")
    }

    fn retract_by(&mut self, mut length: f64, mut restart_extra: f64, comment: &str) -> String {
        let flavor = self.flavor();
        let firmware = self.config.use_firmware_retraction;
        let volumetric = self.config.use_volumetric_e;
        let extruder = self.active_extruder_mut();

        let max = extruder.config().max_retract_length;
        if max > 0.0 {
            length = length.min(max);
        }
        if firmware {
            length = 1.0;
        }
        if volumetric {
            let area = extruder.filament_crossection();
            length *= area;
            restart_extra *= area;
        }
        let de = extruder.retract(length, restart_extra);
        let e = extruder.e();
        let f = extruder.retract_speed() * 60.0;

        let mut gcode = String::new();
        if de != 0.0 {
            if firmware {
                let code = if flavor == GcodeFlavor::Machinekit { "G22" } else { "G10" };
                gcode = format!("{code}{}\n", self.comment(comment));
            } else if flavor.emits_extrusion() {
                let mut line = GcodeLine::linear();
                line.emit_e(e);
                line.emit_f(f);
                line.emit_comment(self.config.gcode_comments, comment);
                self.last_feedrate = Some(f);
                gcode = line.finish();
            }
        }
        if flavor == GcodeFlavor::MakerWare {
            gcode += &format!("M103{}\n", self.comment("extruder off"));
        }
        gcode
    }

    /// Push back what was retracted. Empty when nothing is retracted.
    pub fn unretract(&mut self) -> String {
        let flavor = self.flavor();
        let mut gcode = String::new();
        if flavor == GcodeFlavor::MakerWare {
            gcode += &format!("M101{}\n", self.comment("extruder on"));
        }
        let Some(i) = self.current else {
            return gcode;
        };
        let extruder = &mut self.extruders[i];
        let de = extruder.unretract();
        let e = extruder.e();
        let f = extruder.deretract_speed() * 60.0;
        if de != 0.0 {
            if self.config.use_firmware_retraction {
                let code = if flavor == GcodeFlavor::Machinekit { "G23" } else { "G11" };
                gcode += &format!("{code}{}\n", self.comment("unretract"));
                gcode += &self.reset_e(false);
            } else if flavor.emits_extrusion() {
                let mut line = GcodeLine::linear();
                line.emit_e(e);
                line.emit_f(f);
                line.emit_comment(self.config.gcode_comments, "unretract");
                self.last_feedrate = Some(f);
                gcode += &line.finish();
            }
        }
        gcode
    }

    /// Raise the nozzle by the loaded tool's `z_hop`.
    ///
    /// Normal lifts move at once; lazy and spiral lifts wait for the next
    /// travel. Lifting while lifted re-establishes the lift above the
    /// nominal Z instead of stacking.
    pub fn lift(&mut self, kind: LiftType) -> String {
        let Some(extruder) = self.extruder() else {
            return String::new();
        };
        if !self.z_known {
            return String::new();
        }
        let config = extruder.config();
        let nominal = self.pos.z - self.lifted;
        let above = config.retract_lift_above;
        let below = config.retract_lift_below;
        let mut target = 0.0;
        if nominal >= above - EPSILON && (below == 0.0 || nominal <= below + EPSILON) {
            target = config.z_hop;
        }
        if self.config.printable_height > 0.0 {
            target = target.min(self.config.printable_height - nominal).max(0.0);
        }
        if target <= EPSILON {
            return String::new();
        }

        if self.lifted > 0.0 {
            if (self.lifted - target).abs() < EPSILON {
                return String::new();
            }
            self.lifted = target;
            return self.raw_travel_to_z(nominal + target, "lift Z");
        }
        match kind {
            LiftType::Normal => {
                self.to_lift = 0.0;
                self.lifted = target;
                self.lift_kind = LiftType::Normal;
                self.raw_travel_to_z(nominal + target, "lift Z")
            }
            LiftType::Lazy | LiftType::Spiral => {
                self.to_lift = target;
                self.to_lift_kind = kind;
                String::new()
            }
        }
    }

    /// Return to the nominal Z and drop any pending lift.
    pub fn unlift(&mut self) -> String {
        let mut gcode = String::new();
        if self.lifted > 0.0 {
            let z = self.pos.z - self.lifted;
            self.lifted = 0.0;
            gcode = self.raw_travel_to_z(z, "restore layer Z");
        }
        self.to_lift = 0.0;
        gcode
    }

    /// Fan speed in percent. Always emitted.
    pub fn set_fan(&mut self, speed: u32) -> String {
        self.last_fan_speed = Some(speed.min(100));
        fan_command(self.flavor(), speed)
    }
}

fn same_feedrate(a: f64, b: f64) -> bool {
    (a - b).abs() < 0.5 * 10f64.powi(-(XYZF_EXPORT_DIGITS as i32))
}
