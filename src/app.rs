//! Application struct that encapsulates server assembly and serving logic.

use crate::cli::RunArgs;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uniway_core::config::Config;
use uniway_core::history::HistoryLog;
use uniway_core::kv::{FallbackKv, KvStore, LocalKv, RedisKv};
use uniway_core::lifecycle::signal::SignalHandler;
use uniway_core::lifecycle::{self, Lifecycle};
use uniway_server::AppState;
use uniway_server::store::ConfigStore;

pub struct Application {
    config: Arc<ArcSwap<Config>>,
    app_router: axum::Router,
    lifecycle: Box<dyn Lifecycle>,
    shutdown_timeout: u64,
    #[cfg(unix)]
    _pid_file: Option<uniway_core::lifecycle::pid_file::PidFile>,
}

impl Application {
    /// Build the application from CLI args: load config from the
    /// environment, assemble the KV backend, history log, config store,
    /// and router, and acquire the PID file.
    pub async fn build(args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = Config::from_env();

        if let Some(ref host) = args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(ref pid_file) = args.pid_file {
            config.daemon.pid_file = pid_file.clone();
        }
        if let Some(timeout) = args.shutdown_timeout {
            config.daemon.shutdown_timeout = timeout;
        }

        let shutdown_timeout = config.daemon.shutdown_timeout;

        #[cfg(unix)]
        let _pid_file = if args.daemon {
            Some(uniway_core::lifecycle::pid_file::PidFile::acquire(
                &config.daemon.pid_file,
            )?)
        } else {
            None
        };

        tracing::info!(
            tenant_keys = config.tenant_api_keys.len(),
            redis = config.redis_url.is_some(),
            "Loaded configuration"
        );

        let kv: Arc<dyn KvStore> = match &config.redis_url {
            Some(url) => match RedisKv::connect(url).await {
                Ok(redis) => Arc::new(FallbackKv::new(Arc::new(redis), Arc::new(LocalKv::new()))),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to connect to Redis, falling back to in-process store");
                    Arc::new(LocalKv::new())
                }
            },
            None => Arc::new(LocalKv::new()),
        };

        let store = Arc::new(ConfigStore::new(kv.clone()));
        let history = Arc::new(HistoryLog::new(kv));
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let config = Arc::new(ArcSwap::from_pointee(config));

        let state = AppState {
            config: config.clone(),
            store,
            history,
            http_client,
            start_time: Instant::now(),
        };
        let app_router = uniway_server::build_router(state);

        let lc = lifecycle::detect_lifecycle();

        Ok(Self {
            config,
            app_router,
            lifecycle: lc,
            shutdown_timeout,
            #[cfg(unix)]
            _pid_file,
        })
    }

    /// Start serving HTTP, handle signals, and drain gracefully.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self {
            config,
            app_router,
            lifecycle,
            shutdown_timeout,
            #[cfg(unix)]
            _pid_file,
        } = self;

        let (signal_handler, mut shutdown_rx) = SignalHandler::new();

        // SIGHUP reload re-reads the environment and swaps the config atom;
        // an already-open Redis connection is kept rather than rebuilt.
        let reload_config = config.clone();
        let reload_lifecycle: Arc<dyn Lifecycle> = Arc::from(lifecycle::detect_lifecycle());
        let reload_fn = move || {
            reload_lifecycle.on_reloading();
            let new_cfg = Config::from_env();
            tracing::info!(
                tenant_keys = new_cfg.tenant_api_keys.len(),
                "SIGHUP reload: configuration re-read from environment"
            );
            reload_config.store(Arc::new(new_cfg));
            reload_lifecycle.on_reloaded();
        };

        tokio::spawn(signal_handler.run(reload_fn));

        let addr = {
            let cfg = config.load();
            format!("{}:{}", cfg.host, cfg.port)
        };

        tracing::info!("Starting HTTP server on {addr}");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        lifecycle.on_ready();

        let shutdown = async move {
            let _ = shutdown_rx.wait_for(|v| *v).await;
        };

        axum::serve(listener, app_router)
            .with_graceful_shutdown(shutdown)
            .await?;

        lifecycle.on_stopping();
        tokio::time::sleep(Duration::from_secs(shutdown_timeout.min(5))).await;

        tracing::info!("Server shut down.");
        Ok(())
    }
}
