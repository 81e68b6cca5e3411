mod admin;
mod config;
mod server;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use metaver_lib::{Environment, MetadataScope};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::MetaverConfig;

#[derive(Parser, Debug)]
#[command(name = "metaver")]
#[command(version)]
#[command(about = "Serve and administer versioned metadata", long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short = 'c', long = "config", default_value = "metaver.toml", global = true)]
    config: String,

    /// Application name (overrides [app] name)
    #[arg(short = 'a', long = "app", global = true)]
    app: Option<String>,

    /// Environment (overrides [app] environment)
    #[arg(short = 'e', long = "env", global = true)]
    env: Option<Environment>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long = "log-level", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve metadata over HTTP and follow changes made elsewhere
    Serve {
        /// Port to listen on
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,

        /// Address to bind
        #[arg(long = "hostname")]
        hostname: Option<String>,
    },
    /// List versions of a scope; current versions are marked with `*`
    Versions {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,
    },
    /// Register a new version with an empty manifest
    CreateVersion {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,

        /// Version to create (e.g. 2.1)
        version: String,

        /// Also mark the version as current
        #[arg(long = "current")]
        current: bool,
    },
    /// Replace the set of current versions
    SetCurrent {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,

        #[arg(required = true)]
        versions: Vec<String>,
    },
    /// Upload a JSON file as a metadata item
    Upload {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,

        version: String,

        key: String,

        /// JSON file to upload
        file: PathBuf,
    },
    /// Upload every `<key>.json` file in a directory as one batch
    UploadDir {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,

        version: String,

        dir: PathBuf,
    },
    /// Write every item of a version to `<dir>/<key>.json`
    Export {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,

        version: String,

        dir: PathBuf,
    },
    /// Print a metadata item
    Get {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,

        version: String,

        key: String,

        /// Read the stored payload, bypassing the cache
        #[arg(long = "raw")]
        raw: bool,
    },
    /// Check whether a hash matches the manifest; exits 2 when it does not
    CheckHash {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,

        version: String,

        key: String,

        hash: String,
    },
    /// Bump the shared timestamp so every server reloads
    MarkUpdated {
        #[arg(short = 's', long = "scope", default_value = "app")]
        scope: MetadataScope,
    },
    /// Show loaded versions and shared timestamps
    Status,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(args: &Args) -> MetaverConfig {
    let mut config = MetaverConfig::load(&args.config).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    });
    config.apply_env_overrides();
    if let Some(ref app) = args.app {
        config.app.name = app.clone();
    }
    if let Some(env) = args.env {
        config.app.environment = env;
    }
    config
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level);
    let mut config = load_config(&args);

    let result = match args.cmd {
        Command::Serve { port, hostname } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(hostname) = hostname {
                config.server.hostname = hostname;
            }
            server::run_serve(config).await;
            Ok(())
        }
        Command::Versions { scope } => admin::run_versions(&config, scope).await,
        Command::CreateVersion {
            scope,
            version,
            current,
        } => admin::run_create_version(&config, scope, &version, current).await,
        Command::SetCurrent { scope, versions } => {
            admin::run_set_current(&config, scope, &versions).await
        }
        Command::Upload {
            scope,
            version,
            key,
            file,
        } => admin::run_upload(&config, scope, &version, &key, &file).await,
        Command::UploadDir {
            scope,
            version,
            dir,
        } => admin::run_upload_dir(&config, scope, &version, &dir).await,
        Command::Export {
            scope,
            version,
            dir,
        } => admin::run_export(&config, scope, &version, &dir).await,
        Command::Get {
            scope,
            version,
            key,
            raw,
        } => admin::run_get(&config, scope, &version, &key, raw).await,
        Command::CheckHash {
            scope,
            version,
            key,
            hash,
        } => match admin::run_check_hash(&config, scope, &version, &key, &hash).await {
            Ok(true) => Ok(()),
            Ok(false) => process::exit(2),
            Err(e) => Err(e),
        },
        Command::MarkUpdated { scope } => admin::run_mark_updated(&config, scope).await,
        Command::Status => admin::run_status(&config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
