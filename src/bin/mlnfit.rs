//! mlnfit CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use mlnfit::config::RunConfig;
use mlnfit::data::MlnData;
use mlnfit::engine::CmdStan;
use mlnfit::fit::{fit_mln, Fitted};
use mlnfit::io::csv::{read_stan_csv_chains, save_csv};
use mlnfit::reshape::{flatten, reshape, DrawTable};
use mlnfit::simulate::{simulate, SimulationSpec};

#[derive(Parser)]
#[command(name = "mlnfit")]
#[command(about = "Fit multinomial logistic-normal models through CmdStan")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine on a dataset and summarize the fit
    Fit {
        /// Dataset JSON (Y, X, priors, optional truth)
        #[arg(short, long)]
        data: PathBuf,

        /// Run configuration JSON
        #[arg(short, long)]
        config: PathBuf,

        /// Overrides the configured model directory.
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Keep the engine's files here instead of a temporary directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also save the flat draws as CSV.
        #[arg(long)]
        draws: Option<PathBuf>,

        /// Show a spinner while the engine runs.
        #[arg(long)]
        progress: bool,
    },

    /// Reshape CmdStan CSV output and print parameter shapes
    Reshape {
        /// One CmdStan CSV file per chain
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Base names to keep (comma separated)
        #[arg(long, value_delimiter = ',')]
        pars: Option<Vec<String>>,

        /// Save the filtered, flattened table as CSV.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a synthetic dataset with ground truth
    Simulate {
        #[arg(long, default_value = "10")]
        d: usize,

        #[arg(long, default_value = "30")]
        n: usize,

        #[arg(long, default_value = "2")]
        q: usize,

        /// Mean counts per sample
        #[arg(long, default_value = "5000")]
        depth: f64,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fit {
            data,
            config,
            model_dir,
            output_dir,
            output,
            draws,
            progress,
        } => cmd_fit(
            &data,
            &config,
            model_dir,
            output_dir,
            output.as_deref(),
            draws.as_deref(),
            progress,
        ),
        Commands::Reshape { input, pars, output } => cmd_reshape(&input, pars, output.as_deref()),
        Commands::Simulate {
            d,
            n,
            q,
            depth,
            seed,
            output,
        } => cmd_simulate(SimulationSpec { d, n, q, depth, seed }, output.as_deref()),
    }
}

fn cmd_fit(
    data_path: &Path,
    config_path: &Path,
    model_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    output: Option<&Path>,
    draws_path: Option<&Path>,
    progress: bool,
) -> Result<()> {
    tracing::info!(path = %data_path.display(), "loading data");
    let data = MlnData::from_json_file(data_path)
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("reading {}", data_path.display()))?;
    let mut config = RunConfig::from_json_file(config_path)
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("reading {}", config_path.display()))?;
    if let Some(dir) = model_dir {
        config.model_dir = dir;
    }

    let mut engine = CmdStan::new().with_progress(progress);
    if let Some(dir) = output_dir.or_else(|| config.output_dir.clone()) {
        engine = engine.with_output_dir(dir);
    }

    match fit_mln(&engine, Arc::new(data), &config)? {
        Fitted::Raw(raw) => {
            if let Some(path) = draws_path {
                save_table(&raw.draws, path)?;
            }
            write_json(
                output,
                serde_json::json!({
                    "draws": raw.draws.n_draws(),
                    "columns": raw.draws.columns(),
                    "engine_timings": raw.timings,
                    "output_files": raw.output_files,
                }),
            )
        }
        Fitted::Mln(fit) => {
            if let Some(path) = draws_path {
                save_table(&flatten(&fit.params)?, path)?;
            }
            write_json(output, serde_json::to_value(fit.summary())?)
        }
    }
}

fn cmd_reshape(inputs: &[PathBuf], pars: Option<Vec<String>>, output: Option<&Path>) -> Result<()> {
    let parsed = read_stan_csv_chains(inputs)?;
    tracing::info!(
        draws = parsed.table.n_draws(),
        columns = parsed.table.n_columns(),
        chains = inputs.len(),
        "read engine output"
    );

    let selected: Option<Vec<&str>> = pars
        .as_ref()
        .map(|names| names.iter().map(String::as_str).collect());
    let arrays = reshape(&parsed.table, selected.as_deref())?;
    for (name, array) in &arrays {
        println!("{name}: {:?}", array.shape());
    }

    if let Some(path) = output {
        save_table(&flatten(&arrays)?, path)?;
    }
    Ok(())
}

fn cmd_simulate(spec: SimulationSpec, output: Option<&Path>) -> Result<()> {
    let data = simulate(&spec)?;
    tracing::info!(d = spec.d, n = spec.n, q = spec.q, seed = spec.seed, "simulated dataset");
    match output {
        Some(path) => data
            .save_json(path)
            .map_err(|e| anyhow!(e))
            .with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
    }
}

fn save_table(table: &DrawTable, path: &Path) -> Result<()> {
    let filename = path
        .to_str()
        .ok_or_else(|| anyhow!("path {} is not valid UTF-8", path.display()))?;
    save_csv(table, filename).map_err(|e| anyhow!(e.to_string()))?;
    tracing::info!(path = %path.display(), columns = table.n_columns(), "saved draws");
    Ok(())
}

fn write_json(output: Option<&Path>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
