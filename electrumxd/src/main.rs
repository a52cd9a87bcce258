//! Three entry points behind one binary (spec.md §6's CLI surface, external
//! to the indexing/session logic itself): the server daemon, a local RPC
//! client for the administrative socket, and a standalone history-DB
//! inspection utility. Argument parsing follows `zebrad`'s `gumdrop`-based
//! `Options` derive rather than hand-rolled `std::env::args` matching.

mod block_processor;
mod coin_config;
mod collaborators;
mod config;
mod controller;
mod daemon_rpc;
mod error;
mod peers;
mod rpc;
mod session_manager;
mod utxo_db;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use electrumx_chain::coin::Coin;
use electrumx_session::api::ServerApi;
use electrumx_session::cost::CostLimits;
use electrumx_storage::RocksDbStore;
use gumdrop::Options;
use tokio::net::{TcpListener, UnixListener, UnixStream};
use tracing::info;

use crate::config::Config;
use crate::controller::Controller;
use crate::daemon_rpc::HttpDaemon;
use crate::session_manager::SessionManager;
use crate::utxo_db::RocksUtxoDb;

#[derive(Debug, Options)]
struct Args {
    #[options(help = "print usage and exit")]
    help: bool,
    #[options(help = "path to the TOML config file")]
    conf: Option<PathBuf>,
    #[options(command)]
    command: Option<Command>,
}

#[derive(Debug, Options)]
enum Command {
    #[options(help = "run the indexing server and JSON-RPC session fabric")]
    Serve(ServeOpts),
    #[options(help = "send one request to a running server's local RPC socket")]
    Rpc(RpcOpts),
    #[options(help = "open the history/UTXO databases standalone and report their state")]
    Inspect(InspectOpts),
}

#[derive(Debug, Options)]
struct ServeOpts {
    #[options(help = "print usage and exit")]
    help: bool,
}

#[derive(Debug, Options)]
struct RpcOpts {
    #[options(help = "print usage and exit")]
    help: bool,
    #[options(free, help = "method name followed by its JSON-encoded parameters")]
    args: Vec<String>,
}

#[derive(Debug, Options)]
struct InspectOpts {
    #[options(help = "print usage and exit")]
    help: bool,
}

fn install_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ELECTRUMX_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    install_tracing();

    let args = Args::parse_args_default_or_exit();
    let config = Config::load(args.conf.as_deref())?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    let runtime = runtime.build()?;

    match args.command {
        None | Some(Command::Serve(_)) => runtime.block_on(run_server(config)),
        Some(Command::Rpc(opts)) => runtime.block_on(run_rpc_client(config, opts)),
        Some(Command::Inspect(_)) => runtime.block_on(run_inspect(config)),
    }
}

/// Brings up every owned subsystem and every collaborator, then blocks
/// until `stop` is called over the local RPC socket or the process
/// receives SIGINT/SIGTERM. Mirrors `Controller._start_servers`'s ordering:
/// notifications before the mempool/session loops, the public listener
/// last so nothing can reach a session before the rest is live.
async fn run_server(config: Config) -> color_eyre::eyre::Result<()> {
    std::fs::create_dir_all(&config.db_dir)?;

    let hist_store = Arc::new(RocksDbStore::open(config.db_dir.join("hist"))?);
    let utxo_db = Arc::new(RocksUtxoDb::open(config.db_dir.join("utxo"))?);
    let history = electrumx_history::History::open(hist_store, utxo_db.flushed_tx_count())?;

    let daemon: Arc<dyn collaborators::DaemonRpc> =
        Arc::new(HttpDaemon::new(&config.daemon_url).map_err(|e| color_eyre::eyre::eyre!(e))?);

    let cost_limits = CostLimits {
        soft_limit: config.cost_soft_limit,
        hard_limit: config.cost_hard_limit,
        bw_unit_cost: config.bw_unit_cost,
        ..CostLimits::default()
    };
    let sessions = Arc::new(SessionManager::new(
        cost_limits,
        config.max_sessions,
        Duration::from_secs(config.session_timeout),
        config.session_group_by_subnet_ipv4,
        config.session_group_by_subnet_ipv6,
    ));

    let notifications = Arc::new(tokio::sync::Mutex::new(electrumx_notify::Notifications::new()));

    let controller = Controller::new(
        config.clone(),
        daemon,
        utxo_db.clone() as Arc<dyn collaborators::UtxoDb>,
        history,
        sessions.clone(),
        notifications,
    );
    controller.start_notifications().await;

    tokio::spawn(block_processor::run_sync_loop(controller.clone(), utxo_db.clone()));
    tokio::spawn(controller.clone().run_mempool_loop());
    tokio::spawn(controller.clone().run_maintenance_loop());

    let tcp_listener = TcpListener::bind(config.rpc_bind_addr()?).await?;
    info!(addr = %config.rpc_bind, "listening for JSON-RPC sessions");
    let api: Arc<dyn ServerApi> = controller.clone();
    tokio::spawn(sessions.clone().accept_loop(tcp_listener, api, coin_config::SelectedCoin::HASHX_LEN));

    let _ = std::fs::remove_file(&config.local_rpc_socket);
    let unix_listener = UnixListener::bind(&config.local_rpc_socket)?;
    info!(path = %config.local_rpc_socket.display(), "listening for local rpc");
    let shutdown = Arc::new(tokio::sync::Notify::new());
    tokio::spawn(rpc::serve(unix_listener, controller.clone(), utxo_db.clone(), shutdown.clone()));

    wait_for_shutdown(&shutdown).await;
    info!("shutdown requested, draining sessions");
    // The listening sockets are dropped with the runtime on return; this
    // just gives in-flight sessions a bounded grace period first
    // (spec.md §5's orderly-shutdown note).
    let _ = std::fs::remove_file(&config.local_rpc_socket);
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}

async fn wait_for_shutdown(shutdown: &tokio::sync::Notify) {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                shutdown.notified().await;
                return;
            }
        };
        tokio::select! {
            _ = shutdown.notified() => {},
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = shutdown.notified() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }
}

/// Dials the running server's local RPC socket, sends one request built
/// from `method params...`, prints the single-line JSON reply, and exits.
async fn run_rpc_client(config: Config, opts: RpcOpts) -> color_eyre::eyre::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut args = opts.args.into_iter();
    let method = args
        .next()
        .ok_or_else(|| color_eyre::eyre::eyre!("usage: electrumxd rpc <method> [params...]"))?;
    let params: Vec<serde_json::Value> = args
        .map(|p| serde_json::from_str(&p).unwrap_or(serde_json::Value::String(p)))
        .collect();

    let mut stream = UnixStream::connect(&config.local_rpc_socket).await?;
    let mut request = serde_json::to_string(&serde_json::json!({"method": method, "params": params}))?;
    request.push('\n');

    let (read_half, mut write_half) = stream.split();
    write_half.write_all(request.as_bytes()).await?;
    write_half.flush().await?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    println!("{}", line.trim());
    Ok(())
}

/// Opens both databases read-write but issues no writes, just reporting
/// their on-disk state; useful for confirming a server was shut down
/// cleanly before a maintenance window.
async fn run_inspect(config: Config) -> color_eyre::eyre::Result<()> {
    let hist_store = Arc::new(RocksDbStore::open(config.db_dir.join("hist"))?);
    let utxo_db = RocksUtxoDb::open(config.db_dir.join("utxo"))?;
    let history = electrumx_history::History::open(hist_store, utxo_db.flushed_tx_count())?;

    println!("utxo_db height: {}", utxo_db.height());
    println!("utxo_db flushed_tx_count: {}", utxo_db.flushed_tx_count());
    println!("history hist_db_tx_count: {}", history.hist_db_tx_count());
    Ok(())
}
