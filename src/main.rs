use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

use marketguard::calibrate::run_calibration;
use marketguard::config::{Calibration, EngineConfig, ShockPolicy};
use marketguard::feed::binance_live::{self, LiveOptions, DEFAULT_WS_URL};
use marketguard::logging::{self, log, obj, v_str, Domain, Level};
use marketguard::replay::{run_historical, ReplayOptions};

#[derive(Parser)]
#[command(name = "marketguard")]
#[command(about = "Market-data integrity and circuit-breaker engine", long_about = None)]
struct Cli {
    /// Output base directory (default: /output if present, else ./output)
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Calibration artifact (default: <output>/model_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical CSV feeds through the engine
    Historical {
        /// Data directory (default: /data if present, else ./validation)
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Run against the live Binance futures stream until Ctrl-C
    Realtime {
        #[arg(long, default_value = DEFAULT_WS_URL)]
        url: String,
    },

    /// Fit the regime baseline and write the calibration artifact
    Calibrate {
        /// Research directory (default: ./research if present, else ./validation)
        #[arg(long)]
        research: Option<PathBuf>,
    },
}

fn first_existing(preferred: &str, fallback: &str) -> PathBuf {
    if Path::new(preferred).exists() {
        PathBuf::from(preferred)
    } else {
        PathBuf::from(fallback)
    }
}

fn load_config(path: &Path, policy: ShockPolicy) -> EngineConfig {
    let cal = Calibration::load_or_default(path);
    EngineConfig::from_env(policy).with_calibration(&cal)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = cli.output.unwrap_or_else(|| first_existing("/output", "./output"));
    let config_path = cli.config.unwrap_or_else(|| output.join("model_config.json"));

    let result = match cli.cmd {
        Commands::Historical { data } => {
            let data_dir = data.unwrap_or_else(|| first_existing("/data", "./validation"));
            let cfg = load_config(&config_path, ShockPolicy::StrictGuard);
            let opts = ReplayOptions::new(data_dir, output.join("historical"));
            run_historical(&cfg, &opts).map(|_| ())
        }
        Commands::Realtime { url } => {
            let cfg = load_config(&config_path, ShockPolicy::FloorSubstitute);
            let mut opts = LiveOptions::new(output.join("realtime"));
            opts.url = url;

            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log(Level::Info, Domain::System, "shutdown_requested", obj(&[]));
                    let _ = tx.send(true);
                }
            });
            binance_live::run(&cfg, opts, rx).await.map(|_| ())
        }
        Commands::Calibrate { research } => {
            let research_dir = research.unwrap_or_else(|| first_existing("./research", "./validation"));
            run_calibration(&research_dir, &config_path).map(|_| ())
        }
    };

    if let Err(err) = &result {
        log(
            Level::Error,
            Domain::System,
            "run_failed",
            obj(&[("error", v_str(&format!("{:#}", err)))]),
        );
    }
    logging::flush();
    result
}
