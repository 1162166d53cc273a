use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapvault::config::Config;
use snapvault::encryptor::XChaChaCipher;
use snapvault::integrity::Sha256Integrity;
use snapvault::store::AtomicFileStore;
use std::io::{self, Write};
use tokio::fs;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// SnapVault - sectioned state persistence with atomic writes and backup fallback
#[derive(Parser)]
#[command(name = "snapvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "snapvault.json")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize SnapVault (write config, create storage directory)
    Init {
        /// Storage directory path
        #[arg(short, long, default_value = "./saves")]
        storage_dir: String,

        /// Save file name inside the storage directory
        #[arg(short = 'f', long, default_value = "snapshot.sav")]
        save_file: String,

        /// Cipher key file path (omit to store saves in the clear)
        #[arg(short, long)]
        key_path: Option<String>,

        /// Disable the corruption-detection digest
        #[arg(long)]
        no_integrity: bool,
    },

    /// Show save file status and statistics
    Status,

    /// Verify the save file's format and integrity digest
    Verify,

    /// Decode the save file and print the snapshot as JSON
    Dump {
        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Delete the save file, its backup, and any stale temp file
    Delete {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    // Use RUST_LOG environment variable to control log level (e.g., RUST_LOG=info,snapvault=debug)
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "SnapVault starting");

    match cli.command {
        Commands::Init {
            storage_dir,
            save_file,
            key_path,
            no_integrity,
        } => cmd_init(&cli.config, &storage_dir, &save_file, key_path, no_integrity).await,

        Commands::Status => cmd_status(&cli.config).await,

        Commands::Verify => cmd_verify(&cli.config).await,

        Commands::Dump { pretty } => cmd_dump(&cli.config, pretty).await,

        Commands::Delete { yes } => cmd_delete(&cli.config, yes).await,
    }
}

/// Build the file store described by a config
async fn store_from_config(cfg: &Config) -> Result<AtomicFileStore> {
    let mut store = AtomicFileStore::new(cfg.save_path());
    if cfg.integrity {
        store = store.with_integrity(Box::new(Sha256Integrity));
    }
    if let Some(key_path) = &cfg.key_path {
        let cipher = XChaChaCipher::from_key_file(key_path)
            .await
            .with_context(|| format!("loading cipher key from {}", key_path))?;
        store = store.with_cipher(Box::new(cipher));
    }
    Ok(store)
}

/// Initialize SnapVault configuration and storage directory
async fn cmd_init(
    config_path: &str,
    storage_dir: &str,
    save_file: &str,
    key_path: Option<String>,
    no_integrity: bool,
) -> Result<()> {
    println!("Initializing SnapVault...");

    let cfg = Config {
        storage_dir: storage_dir.to_string(),
        save_file: save_file.to_string(),
        key_path: key_path.clone(),
        integrity: !no_integrity,
        ..Config::default()
    };
    cfg.validate()?;

    // Check if config already exists
    if fs::try_exists(config_path).await.unwrap_or(false) {
        anyhow::bail!(
            "Configuration file '{}' already exists. Remove it first or use a different path.",
            config_path
        );
    }

    // Create storage directory
    fs::create_dir_all(storage_dir)
        .await
        .with_context(|| format!("creating storage directory '{}'", storage_dir))?;

    // Generate the cipher key up front so the first save doesn't have to
    if let Some(ref key_path) = key_path {
        let _cipher = XChaChaCipher::from_key_file(key_path).await?;
    }

    // Write config file
    let config_json = serde_json::to_string_pretty(&cfg)?;
    fs::write(config_path, config_json)
        .await
        .with_context(|| format!("writing config to '{}'", config_path))?;

    println!("Initialization complete!");
    println!("Config:    {}", config_path);
    println!("Save file: {}", cfg.save_path().display());
    if let Some(key_path) = key_path {
        println!("Key:       {}", key_path);
        println!();
        println!("IMPORTANT: Keep your key file secure and backed up!");
        println!("Without it, your save files cannot be recovered.");
    }

    Ok(())
}

/// Show save file status and statistics
async fn cmd_status(config_path: &str) -> Result<()> {
    let cfg = Config::load(config_path)?;
    let store = store_from_config(&cfg).await?;

    println!("SnapVault Status");
    println!();

    println!("Configuration:");
    println!("  Config file:   {}", config_path);
    println!("  Storage dir:   {}", cfg.storage_dir);
    println!("  Save file:     {}", cfg.save_path().display());
    println!("  Integrity:     {}", if cfg.integrity { "enabled" } else { "disabled" });
    println!("  Encryption:    {}", if cfg.key_path.is_some() { "enabled" } else { "disabled" });
    println!();

    let main_size = fs::metadata(store.path()).await.map(|m| m.len()).ok();
    let backup_size = fs::metadata(store.backup_path()).await.map(|m| m.len()).ok();
    let temp_exists = fs::try_exists(store.temp_path()).await.unwrap_or(false);

    println!("Files:");
    match main_size {
        Some(size) => println!("  Save file:     {} bytes", size),
        None => println!("  Save file:     missing"),
    }
    match backup_size {
        Some(size) => println!("  Backup file:   {} bytes", size),
        None => println!("  Backup file:   missing"),
    }
    if temp_exists {
        println!("  WARNING: stale temp file present (interrupted save?)");
    }

    match store.read().await? {
        Some(snapshot) => {
            println!();
            println!("Snapshot:");
            println!("  Version:       {}", snapshot.version);
            println!("  Last save:     {} (unix seconds)", snapshot.last_save_unix_seconds);
            println!("  Sections:      {}", snapshot.sections.len());
            for section in &snapshot.sections {
                println!(
                    "    {} ({}, {} bytes)",
                    section.key,
                    section.schema_tag,
                    section.json.len()
                );
            }
        }
        None => {
            println!();
            println!("No usable snapshot.");
        }
    }

    Ok(())
}

/// Verify the save file's format and digest without touching the backup
async fn cmd_verify(config_path: &str) -> Result<()> {
    let cfg = Config::load(config_path)?;
    let store = store_from_config(&cfg).await?;

    if !fs::try_exists(store.path()).await.unwrap_or(false) {
        println!("No save file at {}", store.path().display());
        return Ok(());
    }

    let contents = fs::read_to_string(store.path())
        .await
        .with_context(|| format!("reading {:?}", store.path()))?;

    match store.decode(&contents) {
        Ok(snapshot) => {
            println!(
                "OK: save file verifies ({} sections, version {})",
                snapshot.sections.len(),
                snapshot.version
            );
        }
        Err(e) => {
            println!("FAILED: {:#}", e);
            let backup_exists = fs::try_exists(store.backup_path()).await.unwrap_or(false);
            if backup_exists {
                println!("A backup exists; the next load will fall back to it.");
            } else {
                println!("No backup exists; the next load will report no usable save.");
            }
        }
    }

    Ok(())
}

/// Decode the save file (with backup fallback) and print it
async fn cmd_dump(config_path: &str, pretty: bool) -> Result<()> {
    let cfg = Config::load(config_path)?;
    let store = store_from_config(&cfg).await?;

    match store.read().await? {
        Some(snapshot) => {
            let out = if pretty {
                serde_json::to_string_pretty(&snapshot)?
            } else {
                serde_json::to_string(&snapshot)?
            };
            io::stdout().write_all(out.as_bytes())?;
            println!();
        }
        None => {
            eprintln!("No usable snapshot to dump.");
        }
    }

    Ok(())
}

/// Delete the save file and its siblings
async fn cmd_delete(config_path: &str, yes: bool) -> Result<()> {
    let cfg = Config::load(config_path)?;
    let store = store_from_config(&cfg).await?;

    if !fs::try_exists(store.path()).await.unwrap_or(false)
        && !fs::try_exists(store.backup_path()).await.unwrap_or(false)
    {
        anyhow::bail!("No save data at {}", store.path().display());
    }

    // Confirm deletion unless --yes flag is set
    if !yes {
        print!(
            "Delete save data at '{}'? This cannot be undone. [y/N]: ",
            store.path().display()
        );
        io::stdout().flush()?;

        let mut response = String::new();
        io::stdin().read_line(&mut response)?;

        if !response.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.delete().await?;

    println!("Deleted save data at '{}'", store.path().display());

    Ok(())
}
