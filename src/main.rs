use clap::{Parser, Subcommand};
use hf2data::config::{load_config, validate_config};
use hf2data::convert::{convert_alternatives, convert_directory, convert_file, BatchReport, BatchResult};
use hf2data::report::write_json_report;
use hf2data::{validate_input, Config, ConversionOutcome, DatasetPipeline, HealthSummary, NoteFilter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Audio/MIDI dataset curation tools
#[derive(Parser)]
#[command(name = "hf2data")]
#[command(about = "Convert CSV transcriptions to MIDI, build and validate the dataset manifest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert CSV transcriptions to MIDI
    Convert {
        /// CSV file, or directory of CSV files
        input: PathBuf,

        /// Output MIDI file (single-file input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output directory for MIDI files
        #[arg(long)]
        midi_dir: Option<PathBuf>,

        /// Input is a tree of <Song>/<version>.csv alternative transcriptions
        #[arg(long)]
        alternatives: bool,

        /// Overwrite existing MIDI files
        #[arg(long)]
        force: bool,

        /// Omit non-essential (ornamental) notes
        #[arg(long)]
        essential_only: bool,

        /// Note-on velocity for every note
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=127))]
        velocity: Option<u8>,
    },
    /// Build the manifest from raw audio/MIDI pairs
    BuildManifest {
        /// Dataset root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Audio directory relative to the root
        #[arg(long)]
        audio_dir: Option<String>,

        /// MIDI directory relative to the root
        #[arg(long)]
        midi_dir: Option<String>,

        /// Output manifest path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate manifest and file integrity
    Validate {
        /// Dataset root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Manifest to validate
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Output JSON report file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Check MIDI files for health issues
    CheckMidi {
        /// MIDI file or directory containing MIDI files
        path: PathBuf,

        /// Output JSON report file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat warnings (pitch range, duration) as errors
        #[arg(long)]
        strict: bool,
    },
    /// Check audio files for health issues
    CheckAudio {
        /// WAV file or directory containing WAV files
        path: PathBuf,

        /// Output JSON report file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Treat warnings (clipping, duration) as errors
        #[arg(long)]
        strict: bool,

        /// Minimum duration in seconds
        #[arg(long)]
        min_duration: Option<f64>,

        /// Maximum duration in seconds
        #[arg(long)]
        max_duration: Option<f64>,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig,
}

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "hf2data=debug"
    } else if quiet {
        "hf2data=warn"
    } else {
        "hf2data=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose && cli.quiet {
        eprintln!("Error: Cannot specify both --verbose and --quiet");
        return ExitCode::from(EXIT_USAGE);
    }
    init_tracing(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: invalid configuration {}: {:#}", path.display(), e);
                return ExitCode::from(EXIT_USAGE);
            }
        },
        None => Config::default(),
    };

    match run(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn exit_status(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURE)
    }
}

fn run(command: Commands, mut config: Config) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Convert {
            input,
            output,
            midi_dir,
            alternatives,
            force,
            essential_only,
            velocity,
        } => {
            if let Some(velocity) = velocity {
                config.encoder.velocity = velocity;
            }
            validate_input(&input, &config)?;

            let pipeline = DatasetPipeline::new(config);
            let filter = if essential_only {
                NoteFilter::EssentialOnly
            } else {
                NoteFilter::All
            };
            let options = pipeline.convert_options(force, filter);

            if input.is_file() {
                if alternatives {
                    eprintln!("Error: --alternatives expects a directory");
                    return Ok(ExitCode::from(EXIT_USAGE));
                }
                let target = match (output, midi_dir) {
                    (Some(output), _) => output,
                    (None, Some(dir)) => dir.join(default_midi_name(&input)),
                    (None, None) => input.with_extension("mid"),
                };
                return match convert_file(&input, &target, &options)? {
                    ConversionOutcome::Converted(stats) => {
                        println!("Converted: {} -> {}", input.display(), target.display());
                        println!(
                            "  {} notes, {} rows skipped, {} warnings",
                            stats.notes,
                            stats.row_errors.len(),
                            stats.warnings.len()
                        );
                        Ok(ExitCode::SUCCESS)
                    }
                    ConversionOutcome::Skipped { existing } => {
                        println!("Skipped (MIDI exists): {}", existing.display());
                        Ok(ExitCode::SUCCESS)
                    }
                };
            }

            let Some(midi_dir) = midi_dir.or(output) else {
                eprintln!("Error: directory input needs --midi-dir");
                return Ok(ExitCode::from(EXIT_USAGE));
            };
            let report = if alternatives {
                convert_alternatives(&input, &midi_dir, &options)?
            } else {
                convert_directory(&input, &midi_dir, &options)?
            };
            print_batch(&report);
            Ok(exit_status(!report.has_failures()))
        }
        Commands::BuildManifest {
            root,
            audio_dir,
            midi_dir,
            output,
        } => {
            if let Some(dir) = audio_dir {
                config.manifest.audio_dir = dir;
            }
            if let Some(dir) = midi_dir {
                config.manifest.midi_dir = dir;
            }
            let pipeline = DatasetPipeline::new(config);
            let output = output.unwrap_or_else(|| pipeline.manifest_path(&root));
            let report = pipeline.build_manifest(&root, &output)?;

            println!("Manifest written to {}", output.display());
            println!("Total pairs: {}", report.rows.len());
            println!("Unique songs: {}", report.unique_songs());
            println!("Songs with variations: {}", report.songs_with_variations());
            if !report.orphan_audio.is_empty() || !report.orphan_midi.is_empty() {
                println!(
                    "Unpaired files: {} audio, {} MIDI",
                    report.orphan_audio.len(),
                    report.orphan_midi.len()
                );
            }
            if !report.ambiguous.is_empty() {
                println!("Ambiguous pairings excluded: {}", report.ambiguous.len());
            }
            for song in &report.incomplete_variations {
                let missing: Vec<&str> = song.missing.iter().map(|e| e.as_str()).collect();
                println!(
                    "Incomplete variations: {} (missing {})",
                    song.song_name,
                    missing.join(", ")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate {
            root,
            manifest,
            report,
        } => {
            let pipeline = DatasetPipeline::new(config);
            let manifest = manifest.unwrap_or_else(|| pipeline.manifest_path(&root));
            let result = pipeline.validate(&root, &manifest)?;

            println!("Validation {}", result.status);
            println!("Total pairs: {}", result.total_pairs);
            println!("Unique songs: {}", result.unique_songs);
            println!("Songs with variations: {}", result.songs_with_variations);
            println!("Songs without variations: {}", result.songs_without_variations);
            for (kind, count) in &result.violation_counts {
                println!("  {}: {}", kind, count);
            }
            if let Some(path) = report {
                write_json_report(&result, &path)?;
                println!("\nReport written to {}", path.display());
            }
            Ok(exit_status(result.passed()))
        }
        Commands::CheckMidi {
            path,
            output,
            strict,
        } => {
            config.health.strict |= strict;
            let summary = DatasetPipeline::new(config).check_midi(&path)?;
            finish_health(&summary, output.as_deref(), "MIDI")
        }
        Commands::CheckAudio {
            path,
            output,
            strict,
            min_duration,
            max_duration,
        } => {
            config.health.strict |= strict;
            if let Some(min) = min_duration {
                config.health.audio.min_duration_sec = min;
            }
            if let Some(max) = max_duration {
                config.health.audio.max_duration_sec = max;
            }
            if let Err(e) = validate_config(&config) {
                eprintln!("Error: {:#}", e);
                return Ok(ExitCode::from(EXIT_USAGE));
            }
            let summary = DatasetPipeline::new(config).check_audio(&path)?;
            finish_health(&summary, output.as_deref(), "audio")
        }
        Commands::ValidateConfig { config } => match load_config(&config) {
            Ok(config) => {
                println!("Configuration is valid");
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => {
                eprintln!("Configuration is invalid: {:#}", e);
                Ok(ExitCode::from(EXIT_USAGE))
            }
        },
        Commands::ShowConfig => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn default_midi_name(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or(input.as_os_str());
    PathBuf::from(stem).with_extension("mid")
}

fn print_batch(report: &BatchReport) {
    for entry in &report.entries {
        match &entry.result {
            BatchResult::Converted(stats) => println!(
                "Converted: {} ({} notes, {} rows skipped)",
                entry.input,
                stats.notes,
                stats.row_errors.len()
            ),
            BatchResult::Skipped => println!("Skipped (MIDI exists): {}", entry.input),
            BatchResult::Failed { error } => println!("Failed: {}: {}", entry.input, error),
        }
    }
    println!(
        "\nConverted: {}, skipped: {}, failed: {}, empty: {}",
        report.converted(),
        report.skipped(),
        report.failed(),
        report.empty()
    );
}

fn finish_health(summary: &HealthSummary, output: Option<&Path>, kind: &str) -> anyhow::Result<ExitCode> {
    for result in &summary.results {
        if result.violations.is_empty() {
            continue;
        }
        let marker = if result.valid { "WARN" } else { "FAIL" };
        println!("[{}] {}", marker, result.file);
        for violation in &result.violations {
            println!("    {}: {}", violation.check, violation.message);
        }
    }
    println!(
        "\n{} health check {}: {}/{} valid, {} with warnings",
        kind,
        summary.status,
        summary.valid_files,
        summary.total_files,
        summary.files_with_warnings
    );
    if let Some(path) = output {
        write_json_report(summary, path)?;
        println!("Report written to {}", path.display());
    }
    Ok(exit_status(summary.status.is_pass()))
}
