//! lmio-dx - command-line landmark annotation client for Dropbox assets
//!
//! Subcommands:
//! - `authorize`: run the OAuth2 implicit flow and store the access token
//! - `ls`: list a remote directory
//! - `catalog`: build and print the asset catalog of a directory
//! - `browse`: step through a collection, editing and saving landmarks

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use lmio_common::config::{self, TomlConfig};
use lmio_common::events::EventBus;
use lmio_common::Preferences;
use lmio_dx::backend::auth;
use lmio_dx::backend::{DropboxBackend, ListOptions};
use lmio_dx::config::{navigator_options, resolve_access_token};
use lmio_dx::navigation::{Confirm, NavigationState, Navigator};
use lmio_dx::Mode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for lmio-dx
#[derive(Parser, Debug)]
#[command(name = "lmio-dx")]
#[command(about = "Landmark annotation client for assets stored on Dropbox")]
#[command(version)]
struct Args {
    /// Configuration file (overrides LMIO_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dropbox access token (overrides LMIO_DROPBOX_TOKEN and stored preferences)
    #[arg(short, long)]
    token: Option<String>,

    /// Preference file
    #[arg(long)]
    preferences: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in to Dropbox and store the access token
    Authorize,

    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Include dot-files
        #[arg(short, long)]
        all: bool,

        /// Only directories
        #[arg(long)]
        folders: bool,

        /// Comma-separated extension allow-list for files
        #[arg(long, value_delimiter = ',')]
        ext: Vec<String>,
    },

    /// Build the asset catalog of a directory
    Catalog {
        path: String,

        #[arg(short, long, default_value = "image")]
        mode: Mode,
    },

    /// Step through a collection interactively
    Browse {
        /// Asset directory (defaults to the last one used)
        #[arg(long)]
        collection: Option<String>,

        /// Template file to annotate with
        #[arg(long)]
        template: Option<String>,

        #[arg(short, long)]
        mode: Option<Mode>,

        /// Asset index to open first
        #[arg(short, long)]
        index: Option<usize>,

        /// Ask before leaving unsaved landmarks instead of saving them
        #[arg(long)]
        no_auto_save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = config::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&toml_config)?;

    let prefs_path = args
        .preferences
        .clone()
        .or_else(|| toml_config.preferences_path.clone())
        .unwrap_or_else(config::default_preferences_path);
    let prefs = Preferences::load(&prefs_path)
        .with_context(|| format!("Failed to load preferences from {}", prefs_path.display()))?;

    match args.command {
        Command::Authorize => authorize(&toml_config, prefs).await,
        Command::Ls {
            path,
            all,
            folders,
            ext,
        } => {
            let backend = connect(&toml_config, args.token.as_deref(), prefs)?;
            let options = ListOptions {
                show_hidden: all,
                folders_only: folders,
                extensions: ext.iter().map(|e| e.to_ascii_lowercase()).collect(),
                ..ListOptions::default()
            };

            for entry in backend.list(&path, &options).await? {
                let marker = if entry.is_dir { "/" } else { "" };
                println!("{}{}", entry.path, marker);
            }
            Ok(())
        }
        Command::Catalog { path, mode } => {
            let backend = connect(&toml_config, args.token.as_deref(), prefs)?;
            backend.set_assets(&path, mode).await?;

            let catalog = backend.catalog();
            for asset in catalog.assets() {
                println!(
                    "{}\t{}\t{}",
                    asset.id(),
                    asset.texture.as_deref().unwrap_or("-"),
                    asset.material.as_deref().unwrap_or("-")
                );
            }
            info!("{} assets in {}", catalog.len(), path);
            Ok(())
        }
        Command::Browse {
            collection,
            template,
            mode,
            index,
            no_auto_save,
        } => {
            let backend = connect(&toml_config, args.token.as_deref(), prefs)?;
            backend.restore().context("Failed to restore previous session")?;

            if let Some(mode) = mode {
                backend.set_mode(mode.as_str())?;
            }
            if let Some(template) = template {
                backend
                    .set_template(&template, None)
                    .await
                    .with_context(|| format!("Failed to load template {}", template))?;
            }
            if let Some(collection) = collection {
                backend
                    .set_assets(&collection, backend.mode())
                    .await
                    .with_context(|| format!("Failed to list assets in {}", collection))?;
            }

            let options = navigator_options(&toml_config, index, no_auto_save.then_some(false));
            let navigator = Navigator::new(
                Arc::new(backend),
                Arc::new(StdinConfirm),
                EventBus::default(),
                options,
            );

            browse(&navigator).await
        }
    }
}

fn init_tracing(toml_config: &TomlConfig) -> Result<()> {
    let level = &toml_config.logging.level;
    let default_filter = format!("lmio_dx={},lmio_common={}", level, level);

    let file_layer = match &toml_config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

fn connect(toml_config: &TomlConfig, cli_token: Option<&str>, prefs: Preferences) -> Result<DropboxBackend> {
    let token = resolve_access_token(cli_token, &prefs)?;
    Ok(DropboxBackend::connect(&toml_config.backend, &token, prefs)?)
}

async fn authorize(toml_config: &TomlConfig, prefs: Preferences) -> Result<()> {
    let request = auth::authorize(&toml_config.backend)?;

    println!("Open this URL in a browser and sign in:\n\n  {}\n", request.url);
    println!("Then paste the full address you were redirected to:");

    let Some(redirect) = read_line().await? else {
        bail!("No redirect address given");
    };
    let token = auth::complete_authorization(redirect.trim(), &request.state)?;

    let backend = DropboxBackend::connect(&toml_config.backend, &token, prefs)?;
    let account = backend
        .account_info()
        .await
        .context("Token was issued but the account could not be read")?;

    let name = account
        .get("display_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown user");
    println!("Signed in as {}", name);
    Ok(())
}

const BROWSE_HELP: &str = "\
n: next  p: previous  g <i>: go to index  s: save  u: undo  r: redo
l: load landmarks from previous asset  a: toggle auto-save  q: quit";

async fn browse(navigator: &Navigator) -> Result<()> {
    navigator.start().await.context("Failed to start navigation")?;
    print_state(&navigator.snapshot());
    println!("{}", BROWSE_HELP);

    while let Some(line) = read_line().await? {
        let mut words = line.split_whitespace();

        let outcome = match words.next() {
            Some("n") => navigator.next().await.map(|_| ()),
            Some("p") => navigator.previous().await.map(|_| ()),
            Some("g") => match words.next().and_then(|w| w.parse().ok()) {
                Some(index) => navigator.go_to(index).await.map(|_| ()),
                None => {
                    println!("usage: g <index>");
                    continue;
                }
            },
            Some("s") => navigator.save_landmarks().await,
            Some("u") => {
                navigator.undo();
                Ok(())
            }
            Some("r") => {
                navigator.redo();
                Ok(())
            }
            Some("l") => navigator.reload_from_predecessor().await.map(|_| ()),
            Some("a") => {
                let on = navigator.toggle_auto_save();
                println!("auto-save {}", if on { "on" } else { "off" });
                Ok(())
            }
            Some("q") => break,
            _ => {
                println!("{}", BROWSE_HELP);
                continue;
            }
        };

        if let Err(e) = outcome {
            println!("error: {}", e);
        }
        print_state(&navigator.snapshot());
    }

    Ok(())
}

fn print_state(state: &NavigationState) {
    match &state.current {
        Some(current) => {
            let unsaved = if state.has_unsaved_changes() { " (unsaved)" } else { "" };
            println!(
                "[{}/{}] {} - template {}{}",
                current.index + 1,
                state.asset_count,
                current.asset_id,
                current.landmarks.template,
                unsaved
            );
        }
        None => println!("no asset loaded ({})", state.phase),
    }
}

/// One line from stdin, `None` at end of input
async fn read_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(|| -> Result<Option<String>> {
        let mut line = String::new();
        let read = std::io::stdin().read_line(&mut line)?;
        Ok(if read == 0 { None } else { Some(line) })
    })
    .await
    .context("stdin reader failed")?
}

/// Confirmation prompt on the terminal
struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, message: &str) -> bool {
        println!("{} [y/N]", message);
        matches!(
            read_line().await,
            Ok(Some(answer)) if answer.trim().eq_ignore_ascii_case("y")
        )
    }
}
