//! Machine configuration and built-in profiles.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::flavor::GcodeFlavor;

/// How the nozzle is lifted on travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiftType {
    /// Straight up before the travel.
    #[default]
    Normal,
    /// Climb along the travel at a shallow slope.
    Lazy,
    /// Helix up in place.
    Spiral,
}

/// Retraction, lift and material settings of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtruderConfig {
    /// Filament diameter (mm).
    pub filament_diameter: f64,
    /// Flow multiplier.
    pub extrusion_multiplier: f64,
    /// Nozzle temperature (°C).
    pub temperature: u32,
    /// Retraction on travel (mm).
    pub retract_length: f64,
    /// Extra length pushed back after a travel retraction (mm).
    pub retract_restart_extra: f64,
    /// Retraction before a tool change (mm).
    pub retract_length_toolchange: f64,
    /// Extra length pushed back after a tool change (mm).
    pub retract_restart_extra_toolchange: f64,
    /// Retraction speed (mm/s).
    pub retract_speed: f64,
    /// Deretraction speed (mm/s). Zero means the retraction speed.
    pub deretract_speed: f64,
    /// Share of the retraction done before wiping (0 to 1).
    pub retract_before_wipe: f64,
    /// Cap on the total retracted length (mm). Zero means no cap.
    pub max_retract_length: f64,
    /// Lift on retraction (mm).
    pub z_hop: f64,
    /// Only lift above this Z (mm).
    pub retract_lift_above: f64,
    /// Only lift below this Z (mm). Zero means no limit.
    pub retract_lift_below: f64,
}

impl Default for ExtruderConfig {
    fn default() -> Self {
        Self {
            filament_diameter: 1.75,
            extrusion_multiplier: 1.0,
            temperature: 210,
            retract_length: 0.8,
            retract_restart_extra: 0.0,
            retract_length_toolchange: 2.0,
            retract_restart_extra_toolchange: 0.0,
            retract_speed: 35.0,
            deretract_speed: 0.0,
            retract_before_wipe: 0.0,
            max_retract_length: 0.0,
            z_hop: 0.0,
            retract_lift_above: 0.0,
            retract_lift_below: 0.0,
        }
    }
}

impl ExtruderConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.into(),
            })
        };
        if !(self.filament_diameter > 0.0) {
            return invalid("filament_diameter", "must be positive");
        }
        if !(self.extrusion_multiplier > 0.0) {
            return invalid("extrusion_multiplier", "must be positive");
        }
        let lengths = [
            ("retract_length", self.retract_length),
            ("retract_restart_extra", self.retract_restart_extra),
            ("retract_length_toolchange", self.retract_length_toolchange),
            (
                "retract_restart_extra_toolchange",
                self.retract_restart_extra_toolchange,
            ),
            ("max_retract_length", self.max_retract_length),
            ("z_hop", self.z_hop),
            ("retract_lift_above", self.retract_lift_above),
            ("retract_lift_below", self.retract_lift_below),
            ("deretract_speed", self.deretract_speed),
        ];
        for (field, value) in lengths {
            if !value.is_finite() || value < 0.0 {
                return invalid(field, "must be finite and non-negative");
            }
        }
        if !(self.retract_speed > 0.0) {
            return invalid("retract_speed", "must be positive");
        }
        if !(0.0..=1.0).contains(&self.retract_before_wipe) {
            return invalid("retract_before_wipe", "must be between 0 and 1");
        }
        if self.retract_lift_below > 0.0 && self.retract_lift_below < self.retract_lift_above {
            return invalid("retract_lift_below", "must not be below retract_lift_above");
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_travel_speed() -> f64 {
    150.0
}

fn default_extruders() -> Vec<ExtruderConfig> {
    vec![ExtruderConfig::default()]
}

fn default_retract_before_travel() -> f64 {
    2.0
}

fn default_fan_speed() -> u32 {
    100
}

fn default_fan_layers() -> usize {
    1
}

fn default_start_gcode() -> String {
    "G28 ; home all axes\n".into()
}

fn default_end_gcode() -> String {
    "M84 ; disable motors\n".into()
}

/// Machine configuration used by the writer.
///
/// The flavor has no default: a configuration file must name it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcodeConfig {
    /// Profile name.
    #[serde(default)]
    pub name: String,
    /// G-code flavor.
    pub flavor: GcodeFlavor,
    /// E values are relative (`M83`).
    #[serde(default)]
    pub use_relative_e_distances: bool,
    /// Retract with `G10`/`G11` and let the firmware pick the length.
    #[serde(default)]
    pub use_firmware_retraction: bool,
    /// E values are volumes (mm³) instead of filament lengths.
    #[serde(default)]
    pub use_volumetric_e: bool,
    /// Annotate lines with comments.
    #[serde(default = "default_true")]
    pub gcode_comments: bool,
    /// Travel speed (mm/s).
    #[serde(default = "default_travel_speed")]
    pub travel_speed: f64,
    /// Vertical travel speed (mm/s). Zero means the travel speed.
    #[serde(default)]
    pub travel_speed_z: f64,
    /// Acceleration ceiling (mm/s²). Zero means no ceiling.
    #[serde(default)]
    pub max_acceleration: u32,
    /// Acceleration while printing (mm/s²). Zero leaves the firmware value.
    #[serde(default)]
    pub default_acceleration: u32,
    /// Acceleration while travelling (mm/s²). Zero leaves it unchanged.
    #[serde(default)]
    pub travel_acceleration: u32,
    /// Highest reachable Z (mm). Zero means unlimited.
    #[serde(default)]
    pub printable_height: f64,
    /// Lift style on retracted travels.
    #[serde(default)]
    pub z_hop_type: LiftType,
    /// Added to every emitted XY coordinate (mm).
    #[serde(default)]
    pub xy_offset: [f64; 2],
    /// Shortest travel that retracts (mm).
    #[serde(default = "default_retract_before_travel")]
    pub retract_before_travel: f64,
    /// Bed temperature (°C). Zero skips bed heating.
    #[serde(default)]
    pub bed_temperature: u32,
    /// Cooling fan speed (percent).
    #[serde(default = "default_fan_speed")]
    pub fan_speed: u32,
    /// Layers printed with the fan off.
    #[serde(default = "default_fan_layers")]
    pub disable_fan_first_layers: usize,
    /// Emitted after the preamble.
    #[serde(default = "default_start_gcode")]
    pub start_gcode: String,
    /// Emitted before the postamble.
    #[serde(default = "default_end_gcode")]
    pub end_gcode: String,
    /// Per-tool settings, indexed by tool id.
    #[serde(default = "default_extruders")]
    pub extruders: Vec<ExtruderConfig>,
}

impl Default for GcodeConfig {
    fn default() -> Self {
        Self::generic()
    }
}

impl GcodeConfig {
    /// Generic single-tool Marlin machine.
    pub fn generic() -> Self {
        Self {
            name: "Generic".into(),
            flavor: GcodeFlavor::MarlinLegacy,
            use_relative_e_distances: false,
            use_firmware_retraction: false,
            use_volumetric_e: false,
            gcode_comments: true,
            travel_speed: default_travel_speed(),
            travel_speed_z: 0.0,
            max_acceleration: 0,
            default_acceleration: 0,
            travel_acceleration: 0,
            printable_height: 250.0,
            z_hop_type: LiftType::Normal,
            xy_offset: [0.0, 0.0],
            retract_before_travel: default_retract_before_travel(),
            bed_temperature: 60,
            fan_speed: 100,
            disable_fan_first_layers: 1,
            start_gcode: default_start_gcode(),
            end_gcode: default_end_gcode(),
            extruders: default_extruders(),
        }
    }

    /// Creality Ender 3.
    pub fn ender3() -> Self {
        Self {
            name: "Creality Ender 3".into(),
            max_acceleration: 500,
            default_acceleration: 500,
            extruders: vec![ExtruderConfig {
                temperature: 200,
                retract_length: 5.0,
                retract_speed: 45.0,
                z_hop: 0.2,
                ..Default::default()
            }],
            ..Self::generic()
        }
    }

    /// Prusa MK4.
    pub fn prusa_mk4() -> Self {
        Self {
            name: "Prusa MK4".into(),
            flavor: GcodeFlavor::MarlinFirmware,
            use_relative_e_distances: true,
            travel_speed: 200.0,
            travel_speed_z: 12.0,
            max_acceleration: 4000,
            default_acceleration: 2500,
            travel_acceleration: 4000,
            printable_height: 220.0,
            z_hop_type: LiftType::Lazy,
            extruders: vec![ExtruderConfig {
                temperature: 215,
                retract_length: 0.8,
                retract_speed: 35.0,
                retract_before_wipe: 0.7,
                z_hop: 0.2,
                ..Default::default()
            }],
            ..Self::generic()
        }
    }

    /// Prusa XL with five tool heads.
    pub fn prusa_xl_5t() -> Self {
        let tool = ExtruderConfig {
            temperature: 215,
            retract_length: 0.7,
            retract_length_toolchange: 0.0,
            retract_speed: 35.0,
            z_hop: 0.2,
            ..Default::default()
        };
        Self {
            name: "Prusa XL 5T".into(),
            extruders: vec![tool; 5],
            ..Self::prusa_mk4()
        }
    }

    /// Voron 2.4 (350mm).
    pub fn voron_24() -> Self {
        Self {
            name: "Voron 2.4 (350mm)".into(),
            flavor: GcodeFlavor::Klipper,
            use_relative_e_distances: true,
            use_firmware_retraction: true,
            travel_speed: 300.0,
            travel_speed_z: 15.0,
            max_acceleration: 5000,
            default_acceleration: 3000,
            travel_acceleration: 5000,
            printable_height: 340.0,
            z_hop_type: LiftType::Spiral,
            bed_temperature: 110,
            start_gcode: "PRINT_START\n".into(),
            end_gcode: "PRINT_END\n".into(),
            extruders: vec![ExtruderConfig {
                temperature: 240,
                retract_length: 0.5,
                retract_speed: 30.0,
                z_hop: 0.2,
                ..Default::default()
            }],
            ..Self::generic()
        }
    }

    /// Get all built-in profiles.
    pub fn all_profiles() -> Vec<Self> {
        vec![
            Self::generic(),
            Self::ender3(),
            Self::prusa_mk4(),
            Self::prusa_xl_5t(),
            Self::voron_24(),
        ]
    }

    /// Parse a TOML document and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Settings of tool `id`.
    pub fn extruder(&self, id: u32) -> Result<&ExtruderConfig, ConfigError> {
        self.extruders
            .get(id as usize)
            .ok_or(ConfigError::MissingExtruder(id))
    }

    /// Validate settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extruders.is_empty() {
            return Err(ConfigError::NoExtruders);
        }
        let invalid = |field, reason: &str| {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.into(),
            })
        };
        if !(self.travel_speed > 0.0) || !self.travel_speed.is_finite() {
            return invalid("travel_speed", "must be positive");
        }
        if !(self.travel_speed_z >= 0.0) {
            return invalid("travel_speed_z", "must not be negative");
        }
        if !(self.printable_height >= 0.0) {
            return invalid("printable_height", "must not be negative");
        }
        if !(self.retract_before_travel >= 0.0) {
            return invalid("retract_before_travel", "must not be negative");
        }
        if self.xy_offset.iter().any(|v| !v.is_finite()) {
            return invalid("xy_offset", "must be finite");
        }
        if self.fan_speed > 100 {
            return invalid("fan_speed", "must be a percentage");
        }
        for extruder in &self.extruders {
            extruder.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        for profile in GcodeConfig::all_profiles() {
            assert!(profile.validate().is_ok(), "{} is invalid", profile.name);
            assert!(!profile.extruders.is_empty());
        }
        assert_eq!(GcodeConfig::prusa_xl_5t().extruders.len(), 5);
    }

    #[test]
    fn test_from_toml() {
        let config = GcodeConfig::from_toml_str(
            r#"
            flavor = "marlin2"
            use_relative_e_distances = true
            z_hop_type = "lazy"

            [[extruders]]
            retract_length = 1.5
            z_hop = 0.4

            [[extruders]]
            temperature = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.flavor, GcodeFlavor::MarlinFirmware);
        assert_eq!(config.z_hop_type, LiftType::Lazy);
        assert_eq!(config.extruders.len(), 2);
        assert!((config.extruders[0].retract_length - 1.5).abs() < 1e-9);
        assert_eq!(config.extruders[1].temperature, 250);
        assert!((config.travel_speed - 150.0).abs() < 1e-9);
        assert!(config.gcode_comments);
    }

    #[test]
    fn test_flavor_is_required() {
        assert!(matches!(
            GcodeConfig::from_toml_str("travel_speed = 100.0"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            GcodeConfig::from_toml_str("flavor = \"grbl\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GcodeConfig::generic();
        config.extruders[0].retract_before_wipe = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "retract_before_wipe",
                ..
            })
        ));

        let mut config = GcodeConfig::generic();
        config.extruders.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoExtruders)));

        let config = GcodeConfig::generic();
        assert!(matches!(
            config.extruder(3),
            Err(ConfigError::MissingExtruder(3))
        ));
    }
}
