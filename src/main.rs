use std::{path::Path, sync::Arc};

use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use devgate::{
    BackendCommand, FileSystemAdapter, GracefulShutdown, HttpClientFactory, HttpHandler,
    adapters::{BackendProcess, backend_process::parse_env_var},
    build_router,
    config::{ServerConfig, ServerConfigValidator, loader::load_config_unchecked},
    tracing_setup,
    utils::ShutdownReason,
};

const DEFAULT_CONFIG: &str = "devgate.yaml";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Start the router (default)
    Serve(ServeArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Configuration file; defaults apply when the default file is absent
    #[clap(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Listen address, overrides `listen_addr`
    #[clap(long)]
    listen: Option<String>,

    /// Backend URL, overrides `backend.target`
    #[clap(long)]
    backend: Option<String>,

    /// Upstream timeout in seconds, overrides `backend.timeout_secs`
    #[clap(long)]
    timeout: Option<u64>,

    /// Do not launch `backend.command`
    #[clap(long)]
    no_backend: bool,

    /// Extra backend environment as KEY=VALUE (repeatable)
    #[clap(long = "env-var", value_parser = parse_env_var)]
    env_vars: Vec<(String, String)>,

    /// Log level or EnvFilter directives; RUST_LOG wins when set
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[clap(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve(serve)) => serve_command(serve).await,
        None => serve_command(args.serve).await,
    }
}

/// Load the configuration file and apply CLI overrides, then validate.
async fn resolve_config(args: &ServeArgs) -> Result<ServerConfig> {
    let mut config = if Path::new(&args.config).exists() {
        tracing::info!("Loading configuration from {}", args.config);
        load_config_unchecked(&args.config)
            .await
            .with_context(|| format!("Failed to load config from {}", args.config))?
    } else if args.config == DEFAULT_CONFIG {
        tracing::info!("No {DEFAULT_CONFIG} found, using built-in defaults");
        ServerConfig::default()
    } else {
        return Err(eyre!("Configuration file '{}' not found", args.config));
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(backend) = &args.backend {
        config.backend.target = backend.clone();
    }
    if let Some(timeout) = args.timeout {
        config.backend.timeout_secs = timeout;
    }

    ServerConfigValidator::validate(&config)
        .with_context(|| format!("Invalid configuration in {}", args.config))?;
    Ok(config)
}

/// Start the backend command and watch it until it exits or shutdown begins.
fn spawn_backend(
    config: &ServerConfig,
    args: &ServeArgs,
    shutdown: &GracefulShutdown,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    let Some(command) = config.backend.command.as_deref() else {
        return Ok(None);
    };
    if args.no_backend {
        tracing::info!("Backend launch disabled, expecting it at {}", config.backend.target);
        return Ok(None);
    }

    let backend = BackendCommand::new(
        command,
        config.backend.command_port(),
        &config.backend.env,
        &args.env_vars,
    );
    let process = backend.spawn()?;

    let shutdown = shutdown.clone();
    let mut shutdown_rx = shutdown.subscribe();
    Ok(Some(tokio::spawn(async move {
        watch_backend(process, &shutdown, &mut shutdown_rx).await;
    })))
}

async fn watch_backend(
    mut process: BackendProcess,
    shutdown: &GracefulShutdown,
    shutdown_rx: &mut tokio::sync::broadcast::Receiver<ShutdownReason>,
) {
    let exited = tokio::select! {
        status = process.wait() => Some(status),
        _ = shutdown_rx.recv() => None,
    };

    match exited {
        Some(Ok(status)) => {
            tracing::error!("Backend process exited with {}", status);
            shutdown.trigger_shutdown(ShutdownReason::BackendExited);
        }
        Some(Err(e)) => {
            tracing::error!("Lost track of backend process: {:?}", e);
            shutdown.trigger_shutdown(ShutdownReason::BackendExited);
        }
        None => {
            if let Err(e) = process.stop().await {
                tracing::warn!("Failed to stop backend process: {:?}", e);
            }
        }
    }
}

async fn serve_command(args: ServeArgs) -> Result<()> {
    tracing_setup::init_tracing_with_config(&args.log_level, args.log_json)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::debug!("CryptoProvider already installed: {:?}", e);
    }

    let config = resolve_config(&args).await?;

    let clients = HttpClientFactory::new().context("Failed to create HTTP client")?;
    let router = build_router(&config, Arc::new(FileSystemAdapter::new()), &clients)
        .context("Failed to build route table")?;

    for pattern in router.patterns() {
        tracing::info!("Configured route: {}", pattern);
    }

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    let graceful_shutdown = GracefulShutdown::new();
    let backend_task = spawn_backend(&config, &args, &graceful_shutdown)?;

    {
        let signals = graceful_shutdown.clone();
        tokio::spawn(async move { signals.run_signal_handler().await });
    }

    let app = HttpHandler::new(Arc::new(router)).into_app();

    tracing::info!(
        "devgate listening on {} (backend: {})",
        config.listen_addr,
        config.backend.target
    );

    let server_result = tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("Server error")
        },
        shutdown_reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
            Ok(())
        }
    };

    graceful_shutdown.trigger_shutdown(ShutdownReason::Graceful);
    if let Some(task) = backend_task {
        if let Err(e) = task.await {
            tracing::warn!("Backend watcher task failed: {}", e);
        }
    }

    tracing::info!("Graceful shutdown completed");
    server_result
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config_unchecked(config_path).await {
        Ok(config) => {
            println!("Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("Configuration parsing failed:");
            eprintln!("   {e:?}");
            std::process::exit(1);
        }
    };

    if let Err(e) = ServerConfigValidator::validate(&config) {
        eprintln!("Configuration validation failed:");
        eprintln!("{e}");
        std::process::exit(1);
    }

    let clients = HttpClientFactory::new().context("Failed to create HTTP client")?;
    match build_router(&config, Arc::new(FileSystemAdapter::new()), &clients) {
        Ok(router) => {
            println!("Configuration validation: OK");
            println!();
            println!("Configuration Summary:");
            println!("   Listen Address: {}", config.listen_addr);
            println!("   Backend: {}", config.backend.target);
            println!("   Extra proxy targets: {}", config.backend.targets.len());
            println!("   Routes:");
            for pattern in router.patterns() {
                println!("     {pattern}");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Route table could not be built:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# devgate configuration

# The address to listen on
listen_addr: "127.0.0.1:8080"

# Static paths below are resolved against this directory
app_root: "."

backend:
  target: "http://127.0.0.1:8090/"
  timeout_secs: 60
  # preserve_host: true   # forward the inbound Host to the backend
  # command: "gunicorn -b :$PORT main:app"
  # port: 8090            # defaults to the port of target
  # targets:
  #   - prefix: "/api"
  #     target: "http://127.0.0.1:9000/"
  #     remove_prefix: true

static_files:
  cache: true
  cache_timeout_secs: 43200

handlers:
  - url: "/static"
    static_dir: "static"
  - url: "/favicon.ico"
    static_files: "static/favicon.ico"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("   Run 'devgate serve --config {config_path}' to start the router");
    Ok(())
}
