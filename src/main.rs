mod aggregator;
mod collectors;
mod config;
mod http;
mod info;
mod metrics;
mod state;
mod stress;

use aggregator::Aggregator;
use axum::serve;
use clap::Parser;
use collectors::battery::{run_battery_poller, BatteryState};
use collectors::system::SysinfoSource;
use collectors::ExecutionContext;
use config::Config;
use http::HttpAppState;
use metrics::{now_unix, Metrics};
use state::State;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stress::StressEngine;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devinfod")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Collect one snapshot, print it as JSON and exit.
    #[arg(long, conflicts_with = "stress")]
    snapshot: bool,
    /// Load this many cores, then exit.
    #[arg(long, value_name = "CORES")]
    stress: Option<NonZeroUsize>,
    #[arg(long, default_value_t = 30, requires = "stress")]
    stress_secs: u64,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) if cli.snapshot || cli.stress.is_some() => {
            warn!(error = %err, "конфигурация не загружена, используются значения по умолчанию");
            Config::default()
        }
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };

    let logical_cpus = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);

    if let Some(requested) = cli.stress {
        let limit = cfg.stress_core_limit(logical_cpus);
        let cores = if requested.get() > limit {
            warn!(requested = requested.get(), limit, "число ядер ограничено stress.max_cores");
            NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN)
        } else {
            requested
        };
        run_stress_once(cores, Duration::from_secs(cli.stress_secs)).await;
        return;
    }

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let ctx = ExecutionContext::from_env();
    let battery = BatteryState::new();
    let source = Arc::new(
        SysinfoSource::new(cfg.source_paths()).with_command_timeout(cfg.gpu_probe_timeout()),
    );
    let aggregator = Aggregator::new(source, battery.clone(), cfg.gpu_probe_timeout())
        .with_metrics(metrics.clone());

    if cli.snapshot {
        if let Some(payload) = collectors::battery::read_power_supply(&cfg.power_supply_dir())
            .ok()
            .flatten()
        {
            battery.deliver(payload);
        }
        let info = aggregator.snapshot(ctx.as_ref()).await;
        match serde_json::to_string_pretty(&info) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "не удалось сериализовать снимок");
                std::process::exit(1);
            }
        }
        return;
    }

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        session = ctx.as_ref().map(|c| c.display()).unwrap_or("нет"),
        "запуск devinfod"
    );

    let engine = StressEngine::new();
    let app_state = HttpAppState {
        metrics: metrics.clone(),
        state: Arc::new(RwLock::new(State::new(now_unix()))),
        aggregator,
        stress_monitor: engine.monitor(),
        stress: Arc::new(Mutex::new(engine)),
        stress_limit: cfg.stress_core_limit(logical_cpus),
        ctx,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let battery_task = if cfg.battery.enabled {
        Some(tokio::spawn(run_battery_poller(
            battery,
            cfg.power_supply_dir(),
            Duration::from_secs(cfg.battery.poll_interval_secs),
            shutdown_rx.clone(),
        )))
    } else {
        info!("опрос батареи отключён");
        None
    };

    let http_task = {
        let cfg = cfg.clone();
        let app_state = app_state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(app_state);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let collector_task = {
        let app_state = app_state.clone();
        let interval = Duration::from_secs(cfg.interval_secs);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!("получен сигнал остановки цикла сбора");
                        break;
                    }
                    _ = ticker.tick() => {
                        let info = app_state.refresh_snapshot().await;
                        app_state
                            .metrics
                            .set_stress_workers(app_state.stress_monitor.active_workers());
                        tracing::debug!(collected_at = info.collected_at_unix, "снимок обновлён");
                    }
                }
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    if let Some(task) = battery_task {
        let _ = task.await;
    }
    let _ = http_task.await;

    let stress = app_state.stress.clone();
    let _ = tokio::task::spawn_blocking(move || {
        if let Ok(mut engine) = stress.lock() {
            engine.stop();
        }
    })
    .await;
}

async fn run_stress_once(cores: NonZeroUsize, duration: Duration) {
    let mut engine = StressEngine::new();
    if let Err(err) = engine.start(cores) {
        error!(error = %err, "не удалось запустить стресс-тест");
        std::process::exit(1);
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = tokio::signal::ctrl_c() => info!("получен Ctrl+C, стресс-тест прерван"),
    }

    let _ = tokio::task::spawn_blocking(move || engine.stop()).await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
