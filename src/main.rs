use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use viddown::config::Config;
use viddown::media::{detect, provider_for, ProviderKind, ResolveError, Resolver};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a post URL to its title, thumbnails, and sources
    Resolve {
        url: String,
        /// Skip hostname detection and use this provider
        #[arg(short, long, value_enum)]
        provider: Option<ProviderArg>,
    },
    /// Print the single source a download should use
    Best {
        url: String,
        #[arg(short, long, value_enum)]
        provider: Option<ProviderArg>,
    },
    /// Print the provider a URL belongs to
    Detect { url: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProviderArg {
    Tiktok,
    Youtube,
    X,
    Instagram,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Tiktok => ProviderKind::TikTok,
            ProviderArg::Youtube => ProviderKind::YouTube,
            ProviderArg::X => ProviderKind::X,
            ProviderArg::Instagram => ProviderKind::Instagram,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    status: u16,
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_dir = format!("{}/viddown", xdg_config_home);
        let config_path = format!("{}/config.toml", config_dir);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_dir = format!("{}/.config/viddown", home.display());
        let config_path = format!("{}/config.toml", config_dir);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

/// Prints the failure as JSON and exits non-zero.
fn fail(err: ResolveError) -> ! {
    let body = ErrorBody {
        error: err.to_string(),
        kind: err.kind().as_str(),
        status: err.status_code(),
    };
    if let Ok(rendered) = serde_json::to_string_pretty(&body) {
        println!("{}", rendered);
    }
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = get_config_path(&args);

    let config = Config::load(config_path.as_deref()).with_context(|| {
        format!(
            "Failed to load config from {}",
            config_path.as_deref().unwrap_or("environment")
        )
    })?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    // stdout carries the command output
    if config.get_logging_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("Starting viddown...");
    match &config_path {
        Some(path) => info!("Loaded config from: {}", path),
        None => info!("No config file found, using defaults"),
    }

    match args.command {
        Command::Detect { url } => {
            println!("{}", detect(&url));
        }
        Command::Resolve { url, provider } => {
            let provider = provider.map(Into::into);
            let resolver = Resolver::new(&config)?;
            if matches!(provider_for(provider, &url), Ok(ProviderKind::YouTube)) {
                resolver.test_setup().await;
            }
            match resolver.resolve(provider, &url).await {
                Ok(media) => print_json(&media)?,
                Err(e) => fail(e),
            }
        }
        Command::Best { url, provider } => {
            let provider = provider.map(Into::into);
            let resolver = Resolver::new(&config)?;
            if matches!(provider_for(provider, &url), Ok(ProviderKind::YouTube)) {
                resolver.test_setup().await;
            }
            match resolver.best_source(provider, &url).await {
                Ok(source) => print_json(&source)?,
                Err(e) => fail(e),
            }
        }
    }

    Ok(())
}
