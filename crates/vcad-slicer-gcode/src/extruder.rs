//! Filament bookkeeping of one tool.

use std::f64::consts::PI;

use crate::config::ExtruderConfig;

/// E axis state of one tool.
#[derive(Debug, Clone)]
pub struct Extruder {
    id: u32,
    config: ExtruderConfig,
    relative_e: bool,
    volumetric_e: bool,
    e: f64,
    absolute_e: f64,
    retracted: f64,
    restart_extra: f64,
}

impl Extruder {
    /// Tool `id` with its settings.
    pub fn new(id: u32, config: ExtruderConfig, relative_e: bool, volumetric_e: bool) -> Self {
        Self {
            id,
            config,
            relative_e,
            volumetric_e,
            e: 0.0,
            absolute_e: 0.0,
            retracted: 0.0,
            restart_extra: 0.0,
        }
    }

    /// Tool id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Tool settings.
    pub fn config(&self) -> &ExtruderConfig {
        &self.config
    }

    /// Value the next E field carries.
    pub fn e(&self) -> f64 {
        self.e
    }

    /// Filament currently pulled back.
    pub fn retracted(&self) -> f64 {
        self.retracted
    }

    /// Move the filament by `de`. Negative moves count as retraction.
    pub fn extrude(&mut self, de: f64) -> f64 {
        if self.relative_e {
            self.e = 0.0;
        }
        self.e += de;
        self.absolute_e += de;
        if de < 0.0 {
            self.retracted -= de;
        }
        de
    }

    /// Pull back up to `length` in total. Returns the additional amount.
    ///
    /// Nothing happens when at least `length` is already retracted.
    pub fn retract(&mut self, length: f64, restart_extra: f64) -> f64 {
        if self.relative_e {
            self.e = 0.0;
        }
        let to_retract = (length - self.retracted).max(0.0);
        if to_retract > 0.0 {
            self.e -= to_retract;
            self.absolute_e -= to_retract;
            self.retracted += to_retract;
            self.restart_extra = restart_extra;
        }
        to_retract
    }

    /// Push back everything retracted plus the restart extra.
    pub fn unretract(&mut self) -> f64 {
        let de = self.retracted + self.restart_extra;
        self.extrude(de);
        self.retracted = 0.0;
        self.restart_extra = 0.0;
        de
    }

    /// Zero the E axis.
    pub fn reset_e(&mut self) {
        self.e = 0.0;
    }

    /// Filament cross section (mm²).
    pub fn filament_crossection(&self) -> f64 {
        let d = self.config.filament_diameter;
        d * d * PI / 4.0
    }

    /// E units per mm³ of deposited material.
    pub fn e_per_mm3(&self) -> f64 {
        if self.volumetric_e {
            self.config.extrusion_multiplier
        } else {
            self.config.extrusion_multiplier / self.filament_crossection()
        }
    }

    /// Filament consumed so far (mm).
    pub fn used_filament(&self) -> f64 {
        if self.volumetric_e {
            self.extruded_volume() / self.filament_crossection()
        } else {
            self.absolute_e + self.retracted
        }
    }

    /// Material deposited so far (mm³).
    pub fn extruded_volume(&self) -> f64 {
        if self.volumetric_e {
            self.absolute_e + self.retracted
        } else {
            self.used_filament() * self.filament_crossection()
        }
    }

    /// Retraction speed (mm/s).
    pub fn retract_speed(&self) -> f64 {
        self.config.retract_speed
    }

    /// Deretraction speed (mm/s).
    pub fn deretract_speed(&self) -> f64 {
        if self.config.deretract_speed > 0.0 {
            self.config.deretract_speed
        } else {
            self.config.retract_speed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn extruder(relative: bool) -> Extruder {
        Extruder::new(0, ExtruderConfig::default(), relative, false)
    }

    #[test]
    fn test_absolute_extrusion_accumulates() {
        let mut e = extruder(false);
        e.extrude(1.0);
        e.extrude(0.5);
        assert_relative_eq!(e.e(), 1.5);
        assert_relative_eq!(e.used_filament(), 1.5);
    }

    #[test]
    fn test_relative_extrusion_resets() {
        let mut e = extruder(true);
        e.extrude(1.0);
        e.extrude(0.5);
        assert_relative_eq!(e.e(), 0.5);
        assert_relative_eq!(e.used_filament(), 1.5);
    }

    #[test]
    fn test_retract_is_not_repeated() {
        let mut e = extruder(false);
        e.extrude(10.0);
        assert_relative_eq!(e.retract(2.0, 0.0), 2.0);
        assert_relative_eq!(e.retract(2.0, 0.0), 0.0);
        assert_relative_eq!(e.retract(3.0, 0.0), 1.0);
        assert_relative_eq!(e.e(), 7.0);
    }

    #[test]
    fn test_unretract_restores_plus_extra() {
        let mut e = extruder(false);
        e.extrude(10.0);
        e.retract(2.0, 0.25);
        assert_relative_eq!(e.unretract(), 2.25);
        assert_relative_eq!(e.e(), 10.25);
        assert_relative_eq!(e.retracted(), 0.0);
        assert_relative_eq!(e.unretract(), 0.0);
    }

    #[test]
    fn test_e_per_mm3() {
        let e = extruder(false);
        assert_relative_eq!(e.e_per_mm3() * e.filament_crossection(), 1.0);
        let v = Extruder::new(0, ExtruderConfig::default(), false, true);
        assert_relative_eq!(v.e_per_mm3(), 1.0);
    }

    #[test]
    fn test_deretract_speed_fallback() {
        let mut config = ExtruderConfig::default();
        config.deretract_speed = 0.0;
        config.retract_speed = 40.0;
        let e = Extruder::new(1, config, false, false);
        assert_relative_eq!(e.deretract_speed(), 40.0);
    }
}
