use clap::{Parser, Subcommand};
use std::path::PathBuf;

use bidsrun::dispatch::{self, RunOptions};
use bidsrun::{config, output, scan};

#[derive(Parser)]
#[command(name = "bidsrun")]
#[command(about = "Run neuroimaging processing pipelines from a BIDS dataset")]
#[command(long_about = "\
Run neuroimaging processing pipelines from a BIDS dataset

Your dataset is the data source. Subject and session directories are
discovered, each image's JSON sidecar is translated into pipeline options,
and the external processing tools are invoked per subject/session.

Dataset structure:

  bids/
  ├── dataset_description.json
  ├── sub-01/
  │   ├── ses-01/
  │   │   ├── anat/
  │   │   │   ├── sub-01_ses-01_T1w.nii.gz      # Structural (required)
  │   │   │   └── sub-01_ses-01_T1w.json
  │   │   ├── perf/
  │   │   │   ├── sub-01_ses-01_asl.nii.gz      # ASL time series
  │   │   │   └── sub-01_ses-01_m0scan.nii.gz   # Calibration image
  │   │   ├── fmap/
  │   │   │   └── sub-01_ses-01_dir-PA_epi.nii.gz  # Reversed-PE image
  │   │   └── dwi/
  │   │       └── sub-01_ses-01_dir-AP_dwi.nii.gz
  │   └── ses-02/
  └── sub-02/                                    # No session level - also valid
      └── anat/
          └── sub-02_T1w.nii.gz

Pipelines dispatched per session (when the data is present):
  Structural:  struc_preproc.sh (T1w, optional T2w)
  Diffusion:   dMRI_preproc.sh  (echo spacing + PE dir from sidecars)
  Perfusion:   oxasl            (timing, calibration, distortion correction)
Then over the whole output: idp_extract.sh, and optionally MRIQC.

Run 'bidsrun gen-config' to generate a documented bidsrun.toml.")]
#[command(version)]
struct Cli {
    /// Path to the BIDS dataset root
    #[arg(long, default_value = ".", global = true)]
    bidsdir: PathBuf,

    /// Output directory (subject directories are created here)
    #[arg(short, long, default_value = "derivatives", global = true)]
    output: PathBuf,

    /// Path to a bidsrun.toml pipeline config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover the dataset and print the subject/session/file tree
    Scan,
    /// Dispatch the processing pipelines for every subject/session
    Run(RunArgs),
    /// Scan and validate the dataset without dispatching anything
    Check,
    /// Print a stock bidsrun.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Include MRIQC processing
    #[arg(long)]
    mriqc: bool,

    /// Submit jobs via the cluster scheduler (defaults to $CLUSTER_MODE == YES)
    #[arg(long)]
    cluster: bool,

    /// Overwrite the output directory if it already exists
    #[arg(long)]
    overwrite: bool,

    /// Print the commands without executing anything
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Command::Scan => {
            let dataset = scan::scan(&cli.bidsdir)?;
            output::print_scan_output(&dataset);
        }
        Command::Run(args) => {
            if cli.output.exists() && !args.overwrite {
                return Err(format!(
                    "output directory {} already exists - use --overwrite to ignore",
                    cli.output.display()
                )
                .into());
            }
            std::fs::create_dir_all(&cli.output)?;

            let config = config::load_config(cli.config.as_deref())?;
            let cluster = args.cluster || cluster_mode_from_env();
            let dataset = scan::scan(&cli.bidsdir)?;
            output::print_scan_output(&dataset);

            dispatch::run_all(
                &dataset,
                &RunOptions {
                    bidsdir: &cli.bidsdir,
                    outdir: &cli.output,
                    config: &config,
                    cluster,
                    mriqc: args.mriqc,
                    dry_run: args.dry_run,
                },
            )?;
        }
        Command::Check => {
            println!("==> Checking {}", cli.bidsdir.display());
            let dataset = scan::scan(&cli.bidsdir)?;
            config::load_config(cli.config.as_deref())?;
            output::print_scan_output(&dataset);
            println!("==> Dataset is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn cluster_mode_from_env() -> bool {
    std::env::var("CLUSTER_MODE").is_ok_and(|v| v == "YES")
}

/// Initialize logging to stderr: warnings by default, everything with
/// `--debug`.
fn init_logging(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}
