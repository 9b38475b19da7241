//! CLI for framecap: precise frame-telemetry captures with pre-roll.

mod commands;

use clap::{Parser, Subcommand};

use commands::capture::CaptureCommandConfig;
use commands::simulate::SimulateCommandConfig;

#[derive(Parser)]
#[command(name = "framecap")]
#[command(about = "framecap: precise frame-telemetry captures with a pre-roll archive")]
#[command(version = framecap_core::VERSION)]
struct Cli {
    /// Debug-level logging (RUST_LOG still takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frame telemetry of one process from a live stream.
    /// Telemetry lines are read from --source-cmd's stdout, or from stdin.
    Capture {
        /// Process name (a trailing ".exe" is ignored)
        #[arg(long)]
        process: String,

        /// Process id
        #[arg(long)]
        pid: u32,

        /// Capture duration (e.g. "20s", "2m"); 0 runs until Ctrl+C
        #[arg(long, default_value = "0")]
        duration: String,

        /// Countdown before the capture starts (e.g. "3s")
        #[arg(long, default_value = "0")]
        delay: String,

        /// Output directory (default: from config, ./captures)
        #[arg(long)]
        output: Option<String>,

        /// Files to write: json, or json-csv to also keep the raw table
        #[arg(long, default_value = "json", value_parser = ["json", "json-csv"])]
        file_mode: String,

        /// Comment stored with the session
        #[arg(long)]
        comment: Option<String>,

        /// Column schema of the telemetry stream
        #[arg(long, value_parser = ["current", "legacy"])]
        schema: Option<String>,

        /// Mark the capture as remote-controlled
        #[arg(long)]
        remote: bool,

        /// JSON config file
        #[arg(long)]
        config: Option<String>,

        /// Shell command producing telemetry lines on stdout
        #[arg(long)]
        source_cmd: Option<String>,
    },

    /// Build a session from a record file (.csv or .json) and summarize it
    Parse {
        /// Record file
        file: String,

        /// Column schema for CSV files without a header
        #[arg(long, default_value = "current", value_parser = ["current", "legacy"])]
        schema: String,

        /// Write the session as JSON
        #[arg(long)]
        output: Option<String>,
    },

    /// List stored sessions, or show one
    Sessions {
        /// Session file to show
        #[arg(long)]
        session: Option<String>,

        /// Directory to list
        #[arg(long, default_value = "captures")]
        dir: String,
    },

    /// Merge several sessions into one with a continuous timeline
    Merge {
        /// Session files, in run order
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output JSON file
        #[arg(long)]
        output: String,

        /// Comment for the merged session
        #[arg(long)]
        comment: Option<String>,
    },

    /// Run a capture against synthetic telemetry, or print synthetic lines
    Simulate {
        /// Scenario: stable-60, stable-144, unstable, gpu-bound, cpu-bound,
        /// stuttering, high-fps, vsync-60
        #[arg(long, default_value = "stable-60")]
        scenario: String,

        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// Number of simulated processes (the first one is captured)
        #[arg(long, default_value = "1")]
        processes: usize,

        /// Print this many telemetry lines to stdout instead of capturing
        /// (0 with --realtime: until stdout closes)
        #[arg(long)]
        lines: Option<usize>,

        /// Pace --lines output in real time, stamped on the system monotonic
        /// clock, so it can feed `framecap capture --source-cmd`
        #[arg(long, requires = "lines")]
        realtime: bool,

        /// Capture duration (default 10s)
        #[arg(long, default_value = "10s")]
        duration: String,

        /// Countdown before the capture starts
        #[arg(long, default_value = "0")]
        delay: String,

        /// Output directory
        #[arg(long)]
        output: Option<String>,

        /// Column schema to emit
        #[arg(long, value_parser = ["current", "legacy"])]
        schema: Option<String>,

        /// JSON config file
        #[arg(long)]
        config: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

fn duration_arg(s: &str) -> std::time::Duration {
    commands::parse_duration(s).unwrap_or_else(|e| commands::fail(e))
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Capture {
            process,
            pid,
            duration,
            delay,
            output,
            file_mode,
            comment,
            schema,
            remote,
            config,
            source_cmd,
        } => commands::capture::run(CaptureCommandConfig {
            process: &process,
            pid,
            duration: duration_arg(&duration),
            delay: duration_arg(&delay),
            output: output.as_deref(),
            file_mode: &file_mode,
            comment: comment.as_deref(),
            remote,
            source_cmd: source_cmd.as_deref(),
            config: commands::load_config(config.as_deref(), schema.as_deref()),
        }),
        Commands::Parse {
            file,
            schema,
            output,
        } => commands::parse::run(&file, commands::parse_schema(&schema), output.as_deref()),
        Commands::Sessions { session, dir } => commands::sessions::run(session.as_deref(), &dir),
        Commands::Merge {
            inputs,
            output,
            comment,
        } => commands::merge::run(&inputs, &output, comment.as_deref()),
        Commands::Simulate {
            scenario,
            seed,
            processes,
            lines,
            realtime,
            duration,
            delay,
            output,
            schema,
            config,
        } => commands::simulate::run(SimulateCommandConfig {
            scenario: &scenario,
            seed,
            processes,
            lines,
            realtime,
            duration: duration_arg(&duration),
            delay: duration_arg(&delay),
            output: output.as_deref(),
            config: commands::load_config(config.as_deref(), schema.as_deref()),
        }),
    }
}
