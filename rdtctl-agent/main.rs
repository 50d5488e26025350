use anyhow::{bail, Context};
use axum::{response::IntoResponse, routing::get, Router};
use clap::{Parser, Subcommand, ValueEnum};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rdtctl::config::DEFAULT_RESCTRL_PATH;
use rdtctl::{
    init, Backend, CacheAllocEntry, CacheLevel, Interface, MbaEntry, Platform, Rdt, RdtConfig,
    RdtMetricExporter, RdtMonitor,
};

#[derive(Parser, Debug)]
#[command(name = "rdtctl")]
#[command(about = "Cache and memory bandwidth allocation for Intel RDT and AMD PQoS")]
struct Args {
    #[arg(long, value_enum, default_value_t = Interface::Auto, help = "Control interface")]
    interface: Interface,

    #[arg(long, default_value = DEFAULT_RESCTRL_PATH, help = "resctrl mount point")]
    resctrl_path: PathBuf,

    #[arg(
        short,
        long,
        help = "Enable verbose logging (shows all MSR and resctrl operations)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Level {
    L2,
    L3,
}

impl From<Level> for CacheLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::L2 => CacheLevel::L2,
            Level::L3 => CacheLevel::L3,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show capabilities and the current allocation
    Show {
        #[arg(long, help = "Include per-class details")]
        verbose: bool,
        #[arg(long, help = "Print as JSON")]
        json: bool,
    },
    /// Read the bandwidth limit of every class
    GetMba {
        #[arg(long, default_value_t = 0)]
        socket: u32,
    },
    /// Set bandwidth limits, e.g. `set-mba 1=50 2=20`
    SetMba {
        #[arg(long, default_value_t = 0)]
        socket: u32,
        #[arg(required = true, value_parser = parse_mba, help = "CLASS=PERCENT")]
        entries: Vec<MbaEntry>,
    },
    /// Read the cache masks of every class
    GetCat {
        #[arg(long, value_enum, default_value_t = Level::L3)]
        level: Level,
        #[arg(long, default_value_t = 0)]
        socket: u32,
    },
    /// Set cache masks, e.g. `set-cat 1=0x3f` or `set-cat 1=0xf0,0x0f` with CDP
    SetCat {
        #[arg(long, value_enum, default_value_t = Level::L3)]
        level: Level,
        #[arg(long, default_value_t = 0)]
        socket: u32,
        #[arg(required = true, value_parser = parse_cat, help = "CLASS=MASK or CLASS=CODE,DATA")]
        entries: Vec<CacheAllocEntry>,
    },
    /// Show the class of service of cores
    AssocGet {
        #[arg(help = "Cores, e.g. 0-3,8")]
        cores: Option<String>,
    },
    /// Associate cores with a class of service
    AssocSet {
        #[arg(help = "Cores, e.g. 0-3,8")]
        cores: String,
        class_id: u32,
    },
    /// Restore full cache masks, unthrottled bandwidth and COS 0
    Reset {
        #[arg(long, value_enum, help = "Switch L3 code and data prioritization")]
        l3_cdp: Option<Toggle>,
    },
    /// Export LLC occupancy and memory bandwidth as Prometheus metrics
    Monitor {
        #[arg(long, help = "Cores to monitor, e.g. 0-3,8 (default: all online)")]
        cores: Option<String>,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

fn parse_mba(s: &str) -> Result<MbaEntry, String> {
    s.parse().map_err(|e: rdtctl::RdtError| e.to_string())
}

fn parse_cat(s: &str) -> Result<CacheAllocEntry, String> {
    s.parse().map_err(|e: rdtctl::RdtError| e.to_string())
}

fn parse_cores(list: &str) -> anyhow::Result<Vec<u32>> {
    match RdtConfig::parse_cpu_list(list) {
        Some(cores) if !cores.is_empty() => Ok(cores),
        _ => bail!("invalid core list '{list}'"),
    }
}

fn check_permissions() -> anyhow::Result<()> {
    let msr_path = "/dev/cpu/0/msr";
    if std::fs::metadata(msr_path).is_err() {
        bail!("cannot access {msr_path}; load the msr kernel module (sudo modprobe msr)");
    }

    if let Err(e) = std::fs::File::open(msr_path) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            bail!("permission denied accessing {msr_path}; run as root");
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_mba(entries: &[MbaEntry]) {
    for entry in entries {
        println!("COS{} => {}%", entry.class_id, entry.mb_max);
    }
}

fn print_cat(level: CacheLevel, entries: &[CacheAllocEntry]) {
    for entry in entries {
        println!("{} COS{} => {}", level, entry.class_id, entry.mask);
    }
}

struct AppState {
    rdt_exporter: Option<Arc<RdtMetricExporter>>,
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    rdtctl::gather_metrics!(buffer, encoder, state.rdt_exporter, "RDT");

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("Shutdown triggered by Ctrl+C"),
        _ = terminate => tracing::warn!("Shutdown triggered by SIGTERM"),
    }

    cancel_token.cancel();
}

async fn serve_metrics(
    platform: &Platform,
    rdt: &Rdt<'_>,
    cores: Vec<u32>,
    port: u16,
) -> anyhow::Result<()> {
    let info = *rdt
        .state()
        .caps
        .mon
        .info()
        .context("cache and bandwidth monitoring is not supported on this platform")?;

    let monitor = RdtMonitor::new(
        platform.msr.clone(),
        platform.topology.as_ref(),
        info,
        &cores,
    )?;
    let exporter = Arc::new(RdtMetricExporter::new(monitor)?);

    let cancel_token = CancellationToken::new();
    let collection_handle = exporter.clone().start(cancel_token.clone());

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(AppState {
            rdt_exporter: Some(exporter),
        }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::warn!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    tracing::info!("Server shutdown complete, waiting for collection loop to finish...");
    let _ = collection_handle.await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = RdtConfig::auto_detect(args.interface).with_resctrl_path(&args.resctrl_path);
    let platform = Platform::system(&config);
    let state = init::init(&platform, &config)?;
    let rdt = Rdt::new(state, &platform);

    let monitoring = matches!(args.command, Command::Monitor { .. });
    if rdt.backend() == Backend::Hardware || monitoring {
        check_permissions()?;
    }

    match args.command {
        Command::Show { verbose, json } => {
            if json {
                #[derive(Serialize)]
                struct Report<'a> {
                    state: &'a rdtctl::RdtState,
                    sockets: Vec<rdtctl::report::SocketAllocation>,
                }
                print_json(&Report {
                    state,
                    sockets: rdt.snapshot()?,
                })?;
            } else {
                let mut stdout = std::io::stdout().lock();
                rdt.print_config(&mut stdout, verbose)?;
                stdout.flush()?;
            }
        }
        Command::GetMba { socket } => print_mba(&rdt.get_mba(socket)?),
        Command::SetMba { socket, entries } => print_mba(&rdt.set_mba(socket, &entries)?),
        Command::GetCat { level, socket } => {
            let level = level.into();
            print_cat(level, &rdt.get_cat(level, socket)?);
        }
        Command::SetCat {
            level,
            socket,
            entries,
        } => {
            let level = level.into();
            print_cat(level, &rdt.set_cat(level, socket, &entries)?);
        }
        Command::AssocGet { cores } => {
            let cores = match cores {
                Some(list) => parse_cores(&list)?,
                None => config.cores.clone(),
            };
            for core in cores {
                println!("Core {} => COS{}", core, rdt.get_assoc(core)?);
            }
        }
        Command::AssocSet { cores, class_id } => {
            for core in parse_cores(&cores)? {
                rdt.set_assoc(core, class_id)?;
                println!("Core {} => COS{}", core, class_id);
            }
        }
        Command::Reset { l3_cdp } => {
            rdt.reset(l3_cdp.map(|t| matches!(t, Toggle::On)))?;
            println!("Allocation reset");
        }
        Command::Monitor { cores, port } => {
            let cores = match cores {
                Some(list) => parse_cores(&list)?,
                None => config.cores.clone(),
            };
            serve_metrics(&platform, &rdt, cores, port).await?;
        }
    }

    Ok(())
}
