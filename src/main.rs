use std::fs::read_to_string;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

use placeopt::types::{OptimizationRequest, ScoreRecord};
use placeopt::{DirectorySink, GoodLpSolver, OptimizeError, Optimizer, OptimizerConfig, ReferenceData};

#[derive(Parser)]
#[command(
    name = "placeopt",
    about = "Place workloads on clusters and pick each cluster's device type",
    version
)]
struct Cli {
    /// Optimizer configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory (or single file) of reference documents; overrides the config
    #[arg(short, long, global = true)]
    manifests: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve an optimization request and print the response
    Optimize {
        /// Request file (YAML)
        request: PathBuf,
        /// Suffix making generated object names unique; random when omitted
        #[arg(long)]
        run_id: Option<String>,
        /// Create the resulting placements as files under this directory
        #[arg(long)]
        apply_dir: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
    /// List the score records found in the reference documents
    Scores {
        /// Only show scores of this cluster
        #[arg(long)]
        cluster: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            let client_error = e
                .downcast_ref::<OptimizeError>()
                .map(OptimizeError::is_client_error)
                .unwrap_or(false);
            if client_error { ExitCode::from(2) } else { ExitCode::FAILURE }
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("placeopt=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = OptimizerConfig::load(cli.config.as_deref())?;
    if let Some(manifests) = cli.manifests {
        config.manifests_dir = manifests;
    }
    let references = ReferenceData::load(&config.manifests_dir)?;

    match cli.command {
        Commands::Optimize {
            request,
            run_id,
            apply_dir,
            format,
        } => {
            let request = OptimizationRequest::from_yaml(&read_to_string(request)?)?;
            let run_id = run_id.unwrap_or_else(generate_run_id);

            let optimizer = Optimizer::new(GoodLpSolver::new(config.solver_log), config);
            let report = optimizer.run(&request, &references, &run_id)?;
            let applied = match apply_dir {
                Some(dir) => report.apply(&DirectorySink::new(dir)),
                None => Vec::new(),
            };
            let response = report.to_response(&optimizer.config().document_separator, applied);

            match format {
                Format::Yaml => print!("{}", serde_yaml::to_string(&response)?),
                Format::Json => println!("{}", serde_json::to_string_pretty(&response)?),
            }
        }
        Commands::Scores { cluster } => {
            let records: Vec<&ScoreRecord> = references.score_records(cluster.as_deref()).collect();
            print!("{}", serde_yaml::to_string(&records)?);
        }
    }
    Ok(())
}

/// 8 lowercase hex characters from the clock.
fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{:08x}", (nanos as u64 ^ (nanos >> 64) as u64) as u32)
}
