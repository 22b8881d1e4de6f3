//! fmctl
//!
//! Command-line front end for the fmcore engine.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use fmcore_common::{Entry, RemoteDescriptor, RemoteId, VfsError, VfsResult};
use fmcore_engine::archive::ArchiveSource;
use fmcore_engine::{
    ArchiveEngine, Config, ExtractState, FileBackendRouter, ListOptions, RemoteStore,
    SessionRegistry, SessionTimeouts, SharedVault, SortOrder,
};
use fmcore_vault::{CredentialVault, KeychainBackend, SystemKeychain};
use tokio_util::sync::CancellationToken;

/// Wrong passwords accepted before an interactive extraction gives up.
const PASSWORD_ATTEMPTS: usize = 3;

/// fmctl - browse, move and archive files across local, root and remote storage.
#[derive(Parser, Debug)]
#[command(name = "fmctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List a directory
    Ls {
        /// Directory to list
        path: String,

        /// Include hidden entries
        #[arg(long, short)]
        all: bool,

        /// Compute child counts for directories
        #[arg(long)]
        counts: bool,

        /// Sort order
        #[arg(long, value_enum, default_value = "name")]
        sort: SortArg,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Compress files and folders into a zip archive
    Zip {
        /// Archive to create
        #[arg(long, short)]
        output: String,

        /// Encrypt entries with AES-256
        #[arg(long, short)]
        password: Option<String>,

        /// Files and folders to add
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// Extract a zip archive into a folder named after it
    Unzip {
        /// Archive to extract
        archive: String,

        /// Folder that receives the extracted folder
        destination: String,

        /// Password for encrypted entries (prompted for if needed)
        #[arg(long, short)]
        password: Option<String>,
    },

    /// Browse an archive without extracting it
    ArchiveLs {
        /// Archive to browse
        archive: String,

        /// Folder inside the archive
        #[arg(default_value = "")]
        dir: String,
    },

    /// Move a file or folder, across backends if needed
    Mv {
        /// Source path
        from: String,

        /// Destination path (must not exist)
        to: String,
    },

    /// Manage remote shares
    #[command(subcommand)]
    Remote(RemoteCommands),

    /// Manage the credential vault
    #[command(subcommand)]
    Vault(VaultCommands),
}

/// Subcommands for remote share management.
#[derive(Subcommand, Debug, Clone)]
pub enum RemoteCommands {
    /// Add an SMB share
    Add {
        /// Display name
        name: String,

        /// `host` or `host:port`
        host: String,

        /// Share name
        share: String,

        /// User name
        #[arg(long, short)]
        user: Option<String>,

        /// Password, stored encrypted
        #[arg(long, short)]
        password: Option<String>,

        /// Windows domain
        #[arg(long, short)]
        domain: Option<String>,
    },

    /// List configured shares
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove a share by id
    Rm {
        /// Remote id
        id: String,
    },
}

/// Subcommands for the credential vault.
#[derive(Subcommand, Debug, Clone)]
pub enum VaultCommands {
    /// Delete the vault key; stored passwords become unreadable
    ClearKey,
}

/// Listing sort order.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortArg {
    /// Directories first, then by name
    Name,
    /// Directories first, then largest first
    Size,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortOrder::Name,
            SortArg::Size => SortOrder::Size,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    let keychain: Arc<dyn KeychainBackend> = Arc::new(SystemKeychain);
    let vault: SharedVault = Arc::new(CredentialVault::new(keychain));

    let store = Arc::new(RemoteStore::new(config.remotes_path()));
    store.load()?;

    match cli.command {
        Commands::Remote(cmd) => handle_remote(cmd, &store, &vault),
        Commands::Vault(VaultCommands::ClearKey) => {
            vault.clear_key()?;
            println!("Vault key deleted; stored passwords must be entered again");
            Ok(())
        }
        command => {
            let timeouts = SessionTimeouts {
                connect: Duration::from_secs(config.remote.connect_timeout_secs),
                idle: Duration::from_secs(config.remote.idle_timeout_secs),
            };
            // No SMB client is linked into the CLI; remote paths report the
            // backend as unavailable.
            let sessions = Arc::new(SessionRegistry::new(store, None, vault, timeouts));
            let router = Arc::new(FileBackendRouter::from_config(
                &config,
                Some(sessions.clone()),
            )?);
            let engine = ArchiveEngine::new(router.clone(), config.archive.buffer_size);

            let result = handle_job(command, router, engine).await;
            sessions.close_all();
            result
        }
    }
}

async fn handle_job(
    command: Commands,
    router: Arc<FileBackendRouter>,
    engine: ArchiveEngine,
) -> anyhow::Result<()> {
    match command {
        Commands::Ls {
            path,
            all,
            counts,
            sort,
            json,
        } => {
            let options = ListOptions {
                include_hidden: all,
                child_counts: counts,
                sort: sort.into(),
            };
            let entries = run_job(move |_| router.list_with(&path, &options)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!("{}", format_entry(entry));
                }
            }
        }
        Commands::Zip {
            output,
            password,
            sources,
        } => {
            let report = run_job(move |cancel| {
                engine.compress(&sources, &output, password.as_deref(), &cancel)
            })
            .await?;
            println!(
                "Added {} files and {} folders ({} bytes)",
                report.files, report.directories, report.bytes
            );
        }
        Commands::Unzip {
            archive,
            destination,
            password,
        } => {
            let report = run_job(move |cancel| {
                let mut job = engine.extraction(ArchiveSource::Path(archive), &destination);
                if let Some(password) = password {
                    job.supply_password(&password);
                }
                let mut attempts = 0;
                loop {
                    match job.run(&cancel) {
                        Err(VfsError::NeedPassword) | Err(VfsError::WrongPassword)
                            if job.state() == ExtractState::NeedPassword
                                && attempts < PASSWORD_ATTEMPTS =>
                        {
                            attempts += 1;
                            let password = prompt_password()?;
                            job.supply_password(&password);
                        }
                        other => break other,
                    }
                }
            })
            .await?;
            println!(
                "Extracted {} files and {} folders into {}",
                report.files, report.directories, report.root
            );
            for name in &report.skipped {
                eprintln!("Skipped unsafe entry: {}", name);
            }
        }
        Commands::ArchiveLs { archive, dir } => {
            let index = run_job(move |_| engine.index(&archive)).await?;
            if index.is_encrypted() {
                eprintln!("(archive contains encrypted entries)");
            }
            for entry in index.list(&dir) {
                println!("{}", format_entry(&entry));
            }
        }
        Commands::Mv { from, to } => {
            run_job(move |cancel| router.move_path(&from, &to, &cancel)).await?;
            println!("Moved");
        }
        Commands::Remote(_) | Commands::Vault(_) => {
            anyhow::bail!("not a file job");
        }
    }
    Ok(())
}

fn handle_remote(
    cmd: RemoteCommands,
    store: &RemoteStore,
    vault: &SharedVault,
) -> anyhow::Result<()> {
    match cmd {
        RemoteCommands::Add {
            name,
            host,
            share,
            user,
            password,
            domain,
        } => {
            let mut remote = RemoteDescriptor::new_smb(name, host, share);
            remote.host_and_port()?;
            remote.username = user.unwrap_or_default();
            remote.domain = domain.unwrap_or_default();
            if let Some(password) = password.filter(|p| !p.is_empty()) {
                remote.encrypted_password = vault.encrypt(&password)?;
            }
            let id = remote.id;
            store.add(remote)?;
            store.save()?;
            println!("Added remote {} ({})", id, id.base_path());
        }
        RemoteCommands::List { json } => {
            let remotes = store.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&remotes)?);
            } else if remotes.is_empty() {
                println!("No remotes configured");
            } else {
                println!("{:<12} {:<20} {:<24} {:<16} PASSWORD", "ID", "NAME", "HOST", "SHARE");
                for remote in remotes {
                    println!(
                        "{:<12} {:<20} {:<24} {:<16} {}",
                        remote.id,
                        remote.name,
                        remote.host,
                        remote.share,
                        if remote.has_password() { "stored" } else { "-" }
                    );
                }
            }
        }
        RemoteCommands::Rm { id } => {
            let id = RemoteId::parse(&id)?;
            match store.remove(&id)? {
                Some(removed) => {
                    store.save()?;
                    println!("Removed remote {} ({})", removed.name, id);
                }
                None => anyhow::bail!("Remote {} not found", id),
            }
        }
    }
    Ok(())
}

/// Run a blocking job on the blocking pool. Ctrl-C cancels it.
async fn run_job<T, F>(job: F) -> anyhow::Result<T>
where
    F: FnOnce(CancellationToken) -> VfsResult<T> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        })
    };

    let result = tokio::task::spawn_blocking(move || job(cancel)).await;
    watcher.abort();
    Ok(result??)
}

fn prompt_password() -> VfsResult<String> {
    eprint!("Archive password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(VfsError::NeedPassword);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn format_entry(entry: &Entry) -> String {
    if entry.is_directory {
        let count = if entry.child_count >= 0 {
            format!("{} items", entry.child_count)
        } else {
            "-".to_string()
        };
        format!("d {:>12}  {}/", count, entry.name)
    } else {
        format!("- {:>12}  {}", format_size(entry.size), entry.name)
    }
}

/// Format a byte count in human-readable units.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
