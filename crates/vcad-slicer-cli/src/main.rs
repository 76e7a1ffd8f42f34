//! vcad-slicer CLI - G-code export for sliced print jobs
//!
//! Reads a print job (JSON) and machine settings (TOML or a built-in
//! profile) and writes G-code or the tool schedule.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use vcad_slicer::Print;
use vcad_slicer_gcode::{GcodeConfig, GcodeGenerator, GcodeSettings};
use vcad_slicer_toolorder::ToolOrdering;

#[derive(Parser)]
#[command(name = "vcad-slicer")]
#[command(about = "Turn sliced print jobs into G-code", long_about = None)]
struct Cli {
    /// Log scheduling and generation details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct JobArgs {
    /// Print job (.json)
    job: PathBuf,
    /// Settings file (.toml); without it --profile is used
    settings: Option<PathBuf>,
    /// Built-in machine profile
    #[arg(short, long, default_value = "generic")]
    profile: String,
    /// Tool loaded before the print starts
    #[arg(long)]
    first_extruder: Option<u32>,
    /// Print each object to completion before starting the next
    #[arg(long)]
    complete_objects: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write G-code for a print job
    Export {
        #[command(flatten)]
        job: JobArgs,
        /// Output file (default: the job path with a .gcode extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the tool schedule of a job as JSON
    Schedule {
        #[command(flatten)]
        job: JobArgs,
    },
    /// List built-in machine profiles
    Profiles,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Export { job, output } => {
            let output = output.unwrap_or_else(|| job.job.with_extension("gcode"));
            export(&job, &output)?;
        }
        Commands::Schedule { job } => {
            schedule(&job)?;
        }
        Commands::Profiles => {
            for (slug, config) in profiles() {
                println!(
                    "{slug:<12} {} ({}, {} tool{})",
                    config.name,
                    config.flavor,
                    config.extruders.len(),
                    if config.extruders.len() == 1 { "" } else { "s" }
                );
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Built-in profiles by command-line name.
fn profiles() -> Vec<(&'static str, GcodeConfig)> {
    vec![
        ("generic", GcodeConfig::generic()),
        ("ender3", GcodeConfig::ender3()),
        ("prusa-mk4", GcodeConfig::prusa_mk4()),
        ("prusa-xl-5t", GcodeConfig::prusa_xl_5t()),
        ("voron-24", GcodeConfig::voron_24()),
    ]
}

fn profile(name: &str) -> Option<GcodeConfig> {
    profiles()
        .into_iter()
        .find(|(slug, config)| slug.eq_ignore_ascii_case(name) || config.name.eq_ignore_ascii_case(name))
        .map(|(_, config)| config)
}

fn load_settings(args: &JobArgs) -> Result<GcodeSettings> {
    let mut settings = match &args.settings {
        Some(path) => GcodeSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => {
            let config = profile(&args.profile)
                .with_context(|| format!("Unknown profile: {}", args.profile))?;
            GcodeSettings::new(config)
        }
    };
    if args.first_extruder.is_some() {
        settings.first_extruder = args.first_extruder;
    }
    settings.complete_objects |= args.complete_objects;
    Ok(settings)
}

fn load_print(path: &Path) -> Result<Print> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let print: Print = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse print job {}", path.display()))?;
    Ok(print)
}

fn export(args: &JobArgs, output: &Path) -> Result<()> {
    let settings = load_settings(args)?;
    let print = load_print(&args.job)?;
    let gcode = GcodeGenerator::new(&settings)?.generate(&print)?;
    std::fs::write(output, &gcode)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(path = %output.display(), lines = gcode.lines().count(), "G-code written");
    println!("Exported G-code to {}", output.display());
    Ok(())
}

/// Tool plan of one print height, as printed by `schedule`.
#[derive(Serialize)]
struct LayerSummary {
    print_z: f64,
    extruders: Vec<u32>,
    has_wipe_tower: bool,
    wipe_tower_partitions: usize,
    wipe_tower_volume: f64,
    wiped_entities: bool,
}

fn summarize(ordering: &ToolOrdering) -> Vec<LayerSummary> {
    ordering
        .iter()
        .map(|lt| LayerSummary {
            print_z: lt.print_z,
            extruders: lt.extruders.clone(),
            has_wipe_tower: lt.has_wipe_tower,
            wipe_tower_partitions: lt.wipe_tower_partitions,
            wipe_tower_volume: lt.wipe_tower_volume,
            wiped_entities: lt.wiping_extrusions.is_anything_overridden(),
        })
        .collect()
}

fn schedule(args: &JobArgs) -> Result<()> {
    let settings = load_settings(args)?;
    let print = load_print(&args.job)?;
    print.validate()?;
    let passes: Vec<Vec<LayerSummary>> = GcodeGenerator::new(&settings)?
        .schedule(&print)
        .iter()
        .map(summarize)
        .collect();
    println!("{}", serde_json::to_string_pretty(&passes)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_lookup() {
        assert_eq!(profile("prusa-xl-5t").unwrap().extruders.len(), 5);
        assert_eq!(profile("Voron 2.4 (350mm)").unwrap().name, "Voron 2.4 (350mm)");
        assert!(profile("bambu").is_none());
    }

    #[test]
    fn test_cli_parses_export() {
        let cli = Cli::try_parse_from([
            "vcad-slicer",
            "export",
            "job.json",
            "--profile",
            "ender3",
            "--first-extruder",
            "1",
            "-o",
            "out.gcode",
        ])
        .unwrap();
        match cli.command {
            Commands::Export { job, output } => {
                assert_eq!(job.profile, "ender3");
                assert_eq!(job.first_extruder, Some(1));
                assert_eq!(output, Some(PathBuf::from("out.gcode")));
            }
            _ => panic!("expected export"),
        }
    }
}
