//! G-code flavor definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// G-code flavor (firmware dialect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GcodeFlavor {
    /// Marlin 1.x.
    #[serde(rename = "marlin")]
    MarlinLegacy,
    /// Marlin 2.x.
    #[serde(rename = "marlin2")]
    MarlinFirmware,
    /// Klipper.
    #[serde(rename = "klipper")]
    Klipper,
    /// RepRapFirmware (Duet).
    #[serde(rename = "reprapfirmware")]
    RepRapFirmware,
    /// RepRap / Sprinter.
    #[serde(rename = "reprap")]
    RepRapSprinter,
    /// Repetier.
    #[serde(rename = "repetier")]
    Repetier,
    /// Teacup.
    #[serde(rename = "teacup")]
    Teacup,
    /// MakerBot MakerWare.
    #[serde(rename = "makerware")]
    MakerWare,
    /// Sailfish.
    #[serde(rename = "sailfish")]
    Sailfish,
    /// Mach3 / LinuxCNC.
    #[serde(rename = "mach3")]
    Mach3,
    /// Machinekit.
    #[serde(rename = "machinekit")]
    Machinekit,
    /// Smoothieware.
    #[serde(rename = "smoothie")]
    Smoothie,
    /// Motion only, never an E axis.
    #[serde(rename = "no-extrusion")]
    NoExtrusion,
}

impl GcodeFlavor {
    /// Every flavor.
    pub const ALL: [GcodeFlavor; 13] = [
        Self::MarlinLegacy,
        Self::MarlinFirmware,
        Self::Klipper,
        Self::RepRapFirmware,
        Self::RepRapSprinter,
        Self::Repetier,
        Self::Teacup,
        Self::MakerWare,
        Self::Sailfish,
        Self::Mach3,
        Self::Machinekit,
        Self::Smoothie,
        Self::NoExtrusion,
    ];

    /// Configuration name.
    pub fn name(self) -> &'static str {
        match self {
            Self::MarlinLegacy => "marlin",
            Self::MarlinFirmware => "marlin2",
            Self::Klipper => "klipper",
            Self::RepRapFirmware => "reprapfirmware",
            Self::RepRapSprinter => "reprap",
            Self::Repetier => "repetier",
            Self::Teacup => "teacup",
            Self::MakerWare => "makerware",
            Self::Sailfish => "sailfish",
            Self::Mach3 => "mach3",
            Self::Machinekit => "machinekit",
            Self::Smoothie => "smoothie",
            Self::NoExtrusion => "no-extrusion",
        }
    }

    /// Text in front of the tool number of a tool select.
    pub fn toolchange_prefix(self) -> &'static str {
        match self {
            Self::MakerWare => "M135 T",
            Self::Sailfish => "M108 T",
            _ => "T",
        }
    }

    /// MakerBot dialects.
    pub fn is_makerbot(self) -> bool {
        matches!(self, Self::MakerWare | Self::Sailfish)
    }

    /// Understands `M82`/`M83`.
    pub fn supports_extrusion_mode(self) -> bool {
        matches!(
            self,
            Self::MarlinLegacy
                | Self::MarlinFirmware
                | Self::Klipper
                | Self::Teacup
                | Self::Repetier
                | Self::Smoothie
                | Self::RepRapSprinter
                | Self::RepRapFirmware
        )
    }

    /// Understands `G92 E0`.
    pub fn supports_e_reset(self) -> bool {
        !matches!(self, Self::Mach3 | Self::MakerWare | Self::Sailfish)
    }

    /// Temperature and fan values are given with `P` instead of `S`.
    pub fn uses_p_parameter(self) -> bool {
        matches!(self, Self::Mach3 | Self::Machinekit)
    }

    /// Lines carry an E field.
    pub fn emits_extrusion(self) -> bool {
        self != Self::NoExtrusion
    }
}

impl fmt::Display for GcodeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GcodeFlavor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|flavor| flavor.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownFlavor(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for flavor in GcodeFlavor::ALL {
            assert_eq!(flavor.name().parse::<GcodeFlavor>().unwrap(), flavor);
        }
        assert!(matches!(
            "grbl".parse::<GcodeFlavor>(),
            Err(ConfigError::UnknownFlavor(_))
        ));
    }

    #[test]
    fn test_toolchange_prefix() {
        assert_eq!(GcodeFlavor::MarlinLegacy.toolchange_prefix(), "T");
        assert_eq!(GcodeFlavor::MakerWare.toolchange_prefix(), "M135 T");
        assert_eq!(GcodeFlavor::Sailfish.toolchange_prefix(), "M108 T");
    }
}
