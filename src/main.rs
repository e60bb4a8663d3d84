//! thumbcache - maintenance tool for the persistent thumbnail cache
#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use thumbcache::thumbnail::{self, DEFAULT_MAX_DIMENSION, LoadOutcome};
use thumbcache::{Config, FingerprintKey, StoreNotice, Thumbnail, ThumbnailPool, ThumbnailStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match parse_args()? {
        Command::Info => info(),
        Command::Probe { file, size } => probe(&file, size),
        Command::Generate { files, size } => generate(&files, size),
        Command::Clear => clear(),
        Command::Move { directory } => move_cache(directory),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// CLI commands
enum Command {
    Info,
    Probe { file: PathBuf, size: u32 },
    Generate { files: Vec<PathBuf>, size: u32 },
    Clear,
    Move { directory: PathBuf },
    Help,
    Version,
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() == 1 {
        return Ok(Command::Help);
    }

    // Parse --size flag
    let size = args
        .iter()
        .position(|a| a == "--size" || a == "-s")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.parse::<u32>())
        .transpose()
        .context("Invalid --size value")?
        .unwrap_or(DEFAULT_MAX_DIMENSION);

    let positional: Vec<&String> = {
        let mut out = Vec::new();
        let mut i = 2;
        while i < args.len() {
            if args[i] == "--size" || args[i] == "-s" {
                i += 2;
            } else {
                out.push(&args[i]);
                i += 1;
            }
        }
        out
    };

    match args[1].as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),

        "info" => Ok(Command::Info),

        "probe" => {
            let file = positional
                .first()
                .ok_or_else(|| anyhow::anyhow!("Missing image file"))?;
            Ok(Command::Probe {
                file: PathBuf::from(file.as_str()),
                size,
            })
        }

        "generate" | "gen" => {
            if positional.is_empty() {
                return Err(anyhow::anyhow!("Missing image files"));
            }
            Ok(Command::Generate {
                files: positional.iter().map(|f| PathBuf::from(f.as_str())).collect(),
                size,
            })
        }

        "clear" => Ok(Command::Clear),

        "move" => {
            let directory = positional
                .first()
                .ok_or_else(|| anyhow::anyhow!("Missing target directory"))?;
            Ok(Command::Move {
                directory: PathBuf::from(directory.as_str()),
            })
        }

        other => Err(anyhow::anyhow!(
            "Unknown command: {other}\nRun 'thumbcache --help' for usage"
        )),
    }
}

/// Open the store described by the user's config, printing fallback notices
fn open_store(config: &Config) -> Result<ThumbnailStore> {
    let mut options = config.store_options();
    options.on_notice = Some(Arc::new(|notice: &StoreNotice| {
        eprintln!("⚠️  {notice}");
    }));
    ThumbnailStore::open(options).context("Failed to open thumbnail cache")
}

fn info() -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let stats = store.stats()?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn probe(file: &Path, size: u32) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let key = FingerprintKey::for_file(file, &format!("png:{size}"))?;

    println!("Key:    {key}");
    match store.load(&key)? {
        Some(blob) => println!("Status: cached ({} bytes)", blob.len()),
        None => println!("Status: not cached"),
    }
    Ok(())
}

fn generate(files: &[PathBuf], size: u32) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    let pool = ThumbnailPool::new(config.pool_limit);

    for file in files {
        let thumb = Arc::new(Thumbnail::new());
        match thumbnail::load_thumbnail(&store, &pool, &thumb, file, size) {
            Ok(LoadOutcome::Cached) => println!("  ✓ {} (cached)", file.display()),
            Ok(LoadOutcome::Generated) => println!("  + {} (generated)", file.display()),
            Err(e) => println!("  ✗ {}: {e}", file.display()),
        }
    }

    let written = store.flush().context("Failed to write thumbnails")?;
    println!("\n{written} thumbnails written");
    Ok(())
}

fn clear() -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    store.remove().context("Failed to remove thumbnail cache")?;

    println!("Thumbnail cache cleared.");
    Ok(())
}

fn move_cache(directory: PathBuf) -> Result<()> {
    let mut config = Config::load()?;
    let store = open_store(&config)?;
    store
        .move_directory(&directory)
        .with_context(|| format!("Failed to move cache to {}", directory.display()))?;

    config.directory = Some(directory.clone());
    config.save()?;

    println!("Thumbnail cache moved to {}", directory.display());
    Ok(())
}

fn print_help() {
    let config_path = Config::default_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"thumbcache - persistent thumbnail cache

USAGE:
    thumbcache [COMMAND]

COMMANDS:
    info                               Show cache location and counts (JSON)

    probe <file> [OPTIONS]             Show the cache key and whether it is cached
    generate <files...> [OPTIONS]      Create and store thumbnails for images
      Options:
        -s, --size <px>                Longest edge (default: {})
      Examples:
        thumbcache probe page-001.jpg
        thumbcache generate *.png --size 128

    clear                              Delete all cached thumbnails
    move <directory>                   Move the cache file and remember the new location

OPTIONS:
    -h, --help                         Show this help message
    -v, --version                      Show version information

CONFIG:
    {}
"#,
        DEFAULT_MAX_DIMENSION, config_path
    );
}

fn print_version() {
    println!("thumbcache {}", thumbcache::VERSION);
}
