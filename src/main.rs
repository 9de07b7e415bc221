//! `porthouse`: the launcher binary (spec §4.E, §6).
//!
//! `porthouse init` scaffolds `~/.porthouse` (SPEC_FULL.md supplemented
//! feature 1). `porthouse launch --cfg <file>` parses a launch
//! specification, declares exchanges or spawns supervised worker
//! processes. `porthouse --run-module <class> --params <json>` is the
//! hidden one-shot entry point [`Launcher::run_modules`] re-invokes this
//! same binary with; it is not meant to be typed by an operator.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use porthouse::broker::BrokerClient;
use porthouse::config;
use porthouse::launcher::{parse_launch_spec, Launcher};
use porthouse::module_runtime::registry;
use porthouse::observability;
use porthouse::pass_prediction::target::GroundStation;
use porthouse::rest_api::{self, AppState};
use porthouse::router::PacketRouter;
use porthouse::scheduler::model::ScheduleModel;
use porthouse::tracker::OrbitTracker;
use porthouse::{rotator, tracker};
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "porthouse", about = "Distributed ground-station and mission-control framework launcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scaffolds `~/.porthouse` (or `$PORTHOUSE_CFG`) with template config files.
    Init,

    /// Parses a launch specification and supervises its worker processes.
    Launch {
        /// Path to the launch specification YAML file.
        #[arg(long)]
        cfg: PathBuf,
        /// Declare the spec's exchanges, then exit without starting workers.
        #[arg(long)]
        declare_exchanges: bool,
        /// Only start modules whose display name contains one of these substrings.
        #[arg(long, num_args = 0..)]
        include: Vec<String>,
        /// Never start modules whose display name contains one of these substrings.
        #[arg(long, num_args = 0..)]
        exclude: Vec<String>,
        /// Serve the read-only status API (spec §6) on this address alongside supervision.
        #[arg(long)]
        status_addr: Option<std::net::SocketAddr>,
        /// Verbose logging.
        #[arg(short, long)]
        debug: bool,
    },

    /// Internal: constructs and runs one module in its own process. Not a
    /// user-facing command; [`Launcher::run_modules`] invokes this.
    #[command(hide = true, name = "run-module")]
    RunModule {
        /// Fully-qualified module class name.
        #[arg(long)]
        module: String,
        /// JSON-encoded resolved parameter map.
        #[arg(long)]
        params: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Init => {
            config::create_template_config()?;
            println!("wrote template configuration to {}", config::cfg_dir().display());
            Ok(())
        }
        Command::Launch { cfg, declare_exchanges, include, exclude, status_addr, debug } => {
            run_launch(cfg, declare_exchanges, include, exclude, status_addr, debug).await
        }
        Command::RunModule { module, params } => run_module(module, params).await,
    }
}

async fn run_launch(
    cfg: PathBuf,
    declare_exchanges: bool,
    include: Vec<String>,
    exclude: Vec<String>,
    status_addr: Option<std::net::SocketAddr>,
    debug: bool,
) -> anyhow::Result<()> {
    let globals = config::load_globals()?;
    let _guard = observability::init_tracing(&globals.log_path, "porthouse-launcher")?;
    if debug {
        info!("debug logging requested; honor RUST_LOG=debug for full verbosity");
    }

    let contents = std::fs::read_to_string(&cfg)?;
    let spec = parse_launch_spec(&cfg.display().to_string(), &contents)?;
    info!(modules = spec.modules.len(), name = ?spec.name, "loaded launch specification");

    let broker = BrokerClient::connect(&globals.amqp_url).await?;
    let launcher_prefix = spec.name.clone();
    let launcher = Launcher::new(Arc::clone(&broker), globals.clone(), launcher_prefix);

    if declare_exchanges {
        launcher.declare_exchanges(&spec).await?;
        info!("exchanges declared, exiting");
        return Ok(());
    }

    if let Some(addr) = status_addr {
        // Each business module runs in its own supervised process (spec
        // §4.E), so the launcher has no in-memory handle onto live
        // schedule/tracker/router state to serve. It seeds the status API
        // with the configured ground station and empty collections, which
        // still answers `/health` and the other read paths honestly rather
        // than never binding at all.
        let gs_config = config::load_groundstation().ok();
        let gs = gs_config
            .as_ref()
            .map(|g| GroundStation { latitude_deg: g.latitude, longitude_deg: g.longitude, elevation_m: g.elevation })
            .unwrap_or(GroundStation { latitude_deg: 0.0, longitude_deg: 0.0, elevation_m: 0.0 });
        let groundstation_name = gs_config.map(|g| g.name).unwrap_or_else(|| "unknown".to_string());
        let state = AppState {
            schedule: Arc::new(RwLock::new(ScheduleModel::new())),
            tracker: Arc::new(RwLock::new(OrbitTracker::new(groundstation_name, gs))),
            router: Arc::new(PacketRouter::new()),
        };
        tokio::spawn(async move {
            if let Err(err) = rest_api::start_server(addr, state).await {
                error!(error = %err, "status API server exited");
            }
        });
        info!(%addr, "status API listening");
    }

    let exe_path = std::env::current_exe()?.display().to_string();
    let includes = (!include.is_empty()).then_some(include.as_slice());
    let excludes = (!exclude.is_empty()).then_some(exclude.as_slice());

    if let Err(err) = launcher.run_modules(&spec, &exe_path, includes, excludes).await {
        error!(error = %err, "launcher supervision ended");
        return Err(err.into());
    }
    Ok(())
}

/// Registers every builtin module class against `broker` so `run-module`
/// can construct it (spec §9 "Dynamic class loading by string"). Without
/// this call, `registry::construct` has nothing to look up and every
/// `run-module` invocation fails with `UnknownClass`.
async fn register_builtin_modules(broker: Arc<BrokerClient>) {
    rotator::worker::factory::register(Arc::clone(&broker)).await;
    tracker::worker::factory::register(broker).await;
}

async fn run_module(module: String, params_json: String) -> anyhow::Result<()> {
    let globals = config::load_globals()?;
    let _guard = observability::init_tracing(&globals.log_path, "porthouse-worker")?;

    let params: std::collections::HashMap<String, serde_json::Value> = serde_json::from_str(&params_json)?;
    let display_name = params
        .get("prefix")
        .and_then(|v| v.as_str())
        .unwrap_or(&module)
        .to_string();

    let broker = BrokerClient::connect(&globals.amqp_url).await?;
    register_builtin_modules(Arc::clone(&broker)).await;

    info!(module = %module, "starting worker");
    if let Err(err) = registry::construct(&display_name, &module, params).await {
        error!(module = %module, error = %err, "failed to construct module");
        return Err(err.into());
    }

    // Registered factories are expected to spawn their own supervised
    // tasks; keep this process alive for the module's lifetime.
    std::future::pending::<()>().await;
    Ok(())
}
