use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use loopsync_core::crypto::Key;
use loopsync_core::database::SqliteStore;
use loopsync_core::sync::{
    Preferences, RemoteSyncServer, SqlitePreferences, SyncConfig, SyncManager, SyncOutcome,
    SyncServer,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

type Manager = SyncManager<RemoteSyncServer, SqliteStore, SqlitePreferences>;

/// Loopsync CLI - end-to-end encrypted sync of a local record store
#[derive(Parser)]
#[command(name = "loopsync")]
#[command(about = "End-to-end encrypted sync of a local record store", long_about = None)]
struct Cli {
    /// Local database (records and sync settings)
    #[arg(long, global = true, default_value = "loopsync.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new master key and print its backup phrase
    Keygen,

    /// Restore a master key from its 24-word backup phrase
    Recover {
        /// The backup phrase
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,

        /// Store the recovered key in the local settings
        #[arg(long)]
        save: bool,
    },

    /// Register a new sync key with a relay and start syncing
    Register {
        /// Relay base URL
        #[arg(long)]
        relay: String,
    },

    /// Share or join a sync key through a pairing link
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },

    /// Run one sync now
    Sync,

    /// Show sync settings and state
    Status,

    /// Insert or update a local record
    Put {
        /// Record ID
        id: String,

        /// Record body
        body: String,
    },

    /// List local records
    List,

    /// Turn sync off and forget the keys
    Disable,
}

#[derive(Subcommand)]
enum LinkCommands {
    /// Publish a pairing link for this device's sync key
    Create,

    /// Join the sync key behind a pairing link
    Join {
        /// Link ID printed by `link create`
        id: String,

        /// Relay base URL
        #[arg(long)]
        relay: String,

        /// Master key, as base64 or as the backup phrase
        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            let key = Key::generate();
            println!("Master key: {}", key.to_base64());
            println!("Backup phrase:\n{}", key.to_mnemonic()?);
        }
        Commands::Recover { words, save } => {
            let key = Key::from_mnemonic(&words.join(" ")).context("Invalid backup phrase")?;
            println!("Master key: {}", key.to_base64());
            if save {
                let prefs = SqlitePreferences::open(&cli.db)?;
                let mut config = prefs.load()?;
                config.encryption_key = Some(key.to_base64());
                prefs.save(&config)?;
                info!("Recovered key stored in {}", cli.db.display());
            }
        }
        Commands::Register { relay } => {
            let manager = open_manager(&cli.db, &relay)?;
            let master = existing_or_new_key(manager.preferences().load()?)?;

            info!("Registering with {}...", relay);
            let sync_key = manager.server().register().await?;
            println!("Sync key registered.");
            println!("Backup phrase:\n{}", master.to_mnemonic()?);

            let outcome = manager
                .enable_sync(sync_key, &master, &cancel_on_ctrl_c())
                .await?;
            report(outcome);
        }
        Commands::Link {
            command: LinkCommands::Create,
        } => {
            let config = SqlitePreferences::open(&cli.db)?.load()?;
            let (sync_key, relay) = match (&config.sync_key, &config.relay_url) {
                (Some(key), Some(relay)) if config.sync_enabled => (key.clone(), relay.clone()),
                _ => bail!("Sync is not enabled on this device"),
            };

            let link = RemoteSyncServer::new(&relay)?.create_link(&sync_key).await?;
            println!("Link ID: {}", link.id);
            println!(
                "On the other device run:\n  loopsync link join {} --relay {} --key \"<backup phrase>\"",
                link.id, relay
            );
        }
        Commands::Link {
            command: LinkCommands::Join { id, relay, key },
        } => {
            let master = parse_key(&key)?;
            let manager = open_manager(&cli.db, &relay)?;
            let link = manager.server().fetch_link(&id).await.map_err(|e| {
                anyhow!("Could not resolve link {}: {}", id, e)
            })?;

            info!("Joining sync key from link {}", link.id);
            let outcome = manager
                .enable_sync(link.sync_key, &master, &cancel_on_ctrl_c())
                .await?;
            report(outcome);
        }
        Commands::Sync => {
            let config = SqlitePreferences::open(&cli.db)?.load()?;
            let relay = config
                .relay_url
                .ok_or_else(|| anyhow!("No relay configured; run `loopsync register` first"))?;

            let manager = open_manager(&cli.db, &relay)?;
            report(manager.sync(&cancel_on_ctrl_c()).await?);
        }
        Commands::Status => {
            let config = SqlitePreferences::open(&cli.db)?.load()?;
            let records = SqliteStore::open(&cli.db)?.list_records()?.len();
            print_status(&config, records);
        }
        Commands::Put { id, body } => {
            let store = SqliteStore::open(&cli.db)?;
            let record = store.put_record(&id, &body)?;

            let prefs = SqlitePreferences::open(&cli.db)?;
            let mut config = prefs.load()?;
            config.record_local_change();
            prefs.save(&config)?;

            println!("Stored {} (version {} pending)", record.id, config.local_version);
        }
        Commands::List => {
            for record in SqliteStore::open(&cli.db)?.list_records()? {
                println!("{}\t{}", record.id, record.body);
            }
        }
        Commands::Disable => {
            let prefs = SqlitePreferences::open(&cli.db)?;
            let mut config = prefs.load()?;
            config.disable_sync();
            prefs.save(&config)?;
            println!("Sync disabled.");
        }
    }

    Ok(())
}

fn open_manager(db: &Path, relay: &str) -> Result<Manager> {
    let store = SqliteStore::open(db)?;
    let prefs = SqlitePreferences::open(db)?;

    let mut config = prefs.load()?;
    if config.relay_url.as_deref() != Some(relay) {
        config.relay_url = Some(relay.to_string());
        prefs.save(&config)?;
    }

    let server = RemoteSyncServer::new(relay)?;
    Ok(SyncManager::new(server, Arc::new(Mutex::new(store)), prefs))
}

/// Keep the master key already on this device, if any.
fn existing_or_new_key(config: SyncConfig) -> Result<Key> {
    match config.encryption_key {
        Some(encoded) => Key::from_base64(&encoded).context("Stored master key is invalid"),
        None => Ok(Key::generate()),
    }
}

/// Accept either base64 or a backup phrase.
fn parse_key(input: &str) -> Result<Key> {
    if input.split_whitespace().count() > 1 {
        Key::from_mnemonic(input).context("Invalid backup phrase")
    } else {
        Key::from_base64(input).context("Invalid base64 key")
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling sync...");
            trigger.cancel();
        }
    });
    token
}

fn report(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Disabled => println!("Sync is disabled."),
        SyncOutcome::Completed {
            version,
            pulled,
            pushed,
        } => println!(
            "Sync complete: version {} (pulled: {}, pushed: {})",
            version, pulled, pushed
        ),
    }
}

fn print_status(config: &SyncConfig, records: usize) {
    println!(
        "Sync:          {}",
        if config.sync_enabled { "enabled" } else { "disabled" }
    );
    println!(
        "Relay:         {}",
        config.relay_url.as_deref().unwrap_or("-")
    );
    println!("Local version: {}", config.local_version);
    println!("Pending:       {}", if config.dirty { "yes" } else { "no" });
    match config.last_sync_at {
        Some(ts) => println!("Last sync:     {} (unix)", ts),
        None => println!("Last sync:     never"),
    }
    println!("Records:       {}", records);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_accepts_base64_and_phrase() {
        let key = Key::generate();
        assert_eq!(parse_key(&key.to_base64()).unwrap(), key);
        assert_eq!(parse_key(&key.to_mnemonic().unwrap()).unwrap(), key);
        assert!(parse_key("zoo zoo").is_err());
        assert!(parse_key("@@@").is_err());
    }

    #[test]
    fn existing_key_is_reused() {
        let key = Key::generate();
        let config = SyncConfig {
            encryption_key: Some(key.to_base64()),
            ..SyncConfig::default()
        };
        assert_eq!(existing_or_new_key(config).unwrap(), key);
        assert!(existing_or_new_key(SyncConfig::default()).is_ok());
    }

    #[test]
    fn cli_parses_link_join() {
        let cli = Cli::try_parse_from([
            "loopsync",
            "--db",
            "/tmp/x.db",
            "link",
            "join",
            "abc",
            "--relay",
            "http://relay",
            "--key",
            "Zm9v",
        ])
        .unwrap();

        assert_eq!(cli.db, PathBuf::from("/tmp/x.db"));
        match cli.command {
            Commands::Link {
                command: LinkCommands::Join { id, relay, key },
            } => {
                assert_eq!(id, "abc");
                assert_eq!(relay, "http://relay");
                assert_eq!(key, "Zm9v");
            }
            _ => panic!("expected link join"),
        }
    }

    #[test]
    fn recover_requires_words() {
        assert!(Cli::try_parse_from(["loopsync", "recover"]).is_err());
    }

    #[test]
    fn open_manager_records_relay() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("loopsync.db");

        let manager = open_manager(&db, "http://127.0.0.1:1").unwrap();
        assert_eq!(
            manager.preferences().load().unwrap().relay_url.as_deref(),
            Some("http://127.0.0.1:1")
        );
    }
}
