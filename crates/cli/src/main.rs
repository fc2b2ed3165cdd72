// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 db-tunnel Contributors

// db-tunnel - CLI
// Open, list, kill, and test SSH tunnels to databases behind jump hosts

mod profile;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use dialoguer::{Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use zeroize::Zeroizing;

use db_tunnel_common::{
    kill_tunnels, list_tunnels, open_tunnel, verify_tunnel, MemorySink, StdoutSink,
    SystemProcessHost, TunnelSpec, VerifyRequest,
};

use profile::{
    delete_profile_by_name, load_all_profiles, load_profile_by_name, profile_exists_by_name,
    profiles_dir, save_profile, DatabaseConfig, Profile, TunnelConfig,
};

/// Keychain service name for stored database passwords
const KEYCHAIN_SERVICE: &str = "db-tunnel";

#[derive(Parser)]
#[command(name = "db-tunnel")]
#[command(about = "SSH tunnels to databases behind jump hosts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a tunnel (spawns a detached ssh process)
    Open {
        #[command(flatten)]
        target: TunnelTarget,
    },

    /// List running tunnels for a key
    List {
        #[command(flatten)]
        key: KeySource,
    },

    /// Kill running tunnels for a key
    Kill {
        #[command(flatten)]
        key: KeySource,
    },

    /// Test a tunnel by running a query through it
    Test {
        /// Profile to read database parameters from
        #[arg(short = 'P', long)]
        profile: Option<String>,

        /// Local (forwarded) database port
        #[arg(short = 'p', long)]
        db_port: Option<u16>,

        /// Database username
        #[arg(short = 'u', long)]
        db_user: Option<String>,

        /// Database/schema name
        #[arg(short = 'd', long)]
        db_name: Option<String>,

        /// Query to run (default: SELECT 1;)
        #[arg(long)]
        sql: Option<String>,

        /// Connect-and-query timeout in seconds
        #[arg(short = 't', long, default_value = "5")]
        timeout: u64,
    },

    /// Save a new tunnel profile
    Add {
        /// Profile name
        name: String,

        /// Path to the SSH private key for the jump host
        #[arg(short = 'k', long)]
        key_path: Option<String>,

        /// Database endpoint as seen from the jump host
        #[arg(short = 'H', long)]
        db_host: Option<String>,

        /// Database port (also the local bind port)
        #[arg(short = 'p', long)]
        db_port: Option<u16>,

        /// Database/schema name
        #[arg(short = 'd', long)]
        db_name: Option<String>,

        /// Database username
        #[arg(short = 'u', long)]
        db_user: Option<String>,

        /// OS user on the jump host
        #[arg(short = 'j', long)]
        jump_user: Option<String>,

        /// Public address of the jump host
        #[arg(short = 'J', long)]
        jump_host: Option<String>,

        /// Skip interactive prompts (use provided args only)
        #[arg(short = 'y', long)]
        non_interactive: bool,

        /// Store the database password in the system keychain
        #[arg(long)]
        store_password: bool,
    },

    /// List all saved profiles
    Profiles {
        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,
    },

    /// Delete a saved profile
    Delete {
        /// Profile name
        name: String,
    },
}

/// Where to find the key file a tunnel was created from
#[derive(Args)]
struct KeySource {
    /// Profile to read the key path from
    #[arg(short = 'P', long)]
    profile: Option<String>,

    /// Path to the SSH private key
    #[arg(short = 'k', long)]
    key_path: Option<String>,
}

impl KeySource {
    fn resolve(&self) -> Result<PathBuf> {
        if let Some(name) = &self.profile {
            let profile = load_profile_by_name(&profiles_dir()?, name)?;
            Ok(profile.tunnel.key_path)
        } else if let Some(key) = &self.key_path {
            Ok(expand_path(key))
        } else {
            anyhow::bail!("Provide either --profile or --key-path");
        }
    }
}

/// Full tunnel parameters, from a profile or from individual flags
#[derive(Args)]
struct TunnelTarget {
    /// Profile to read all parameters from
    #[arg(short = 'P', long)]
    profile: Option<String>,

    /// Path to the SSH private key for the jump host
    #[arg(short = 'k', long)]
    key_path: Option<String>,

    /// Database endpoint as seen from the jump host
    #[arg(short = 'H', long)]
    db_host: Option<String>,

    /// Database port (also the local bind port)
    #[arg(short = 'p', long, default_value = "3306")]
    db_port: u16,

    /// OS user on the jump host
    #[arg(short = 'j', long)]
    jump_user: Option<String>,

    /// Public address of the jump host
    #[arg(short = 'J', long)]
    jump_host: Option<String>,
}

impl TunnelTarget {
    fn resolve(&self) -> Result<TunnelSpec> {
        if let Some(name) = &self.profile {
            let profile = load_profile_by_name(&profiles_dir()?, name)?;
            return Ok(profile.tunnel_spec());
        }

        let key_path = self
            .key_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--key-path is required without --profile"))?;
        let db_host = self
            .db_host
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--db-host is required without --profile"))?;
        let jump_user = self
            .jump_user
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--jump-user is required without --profile"))?;
        let jump_host = self
            .jump_host
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--jump-host is required without --profile"))?;

        Ok(TunnelSpec {
            key_path: expand_path(key_path),
            db_host: db_host.to_string(),
            db_port: self.db_port,
            jump_user: jump_user.to_string(),
            jump_host: jump_host.to_string(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Open { target } => open_cmd(target)?,
        Commands::List { key } => list_cmd(key)?,
        Commands::Kill { key } => kill_cmd(key)?,
        Commands::Test {
            profile,
            db_port,
            db_user,
            db_name,
            sql,
            timeout,
        } => test_cmd(profile, db_port, db_user, db_name, sql, timeout).await?,
        Commands::Add {
            name,
            key_path,
            db_host,
            db_port,
            db_name,
            db_user,
            jump_user,
            jump_host,
            non_interactive,
            store_password,
        } => add_cmd(
            name,
            key_path,
            db_host,
            db_port,
            db_name,
            db_user,
            jump_user,
            jump_host,
            non_interactive,
            store_password,
        )?,
        Commands::Profiles { json } => profiles_cmd(json)?,
        Commands::Delete { name } => delete_cmd(name)?,
    }

    Ok(())
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

fn open_cmd(target: TunnelTarget) -> Result<()> {
    let spec = target.resolve()?;

    println!(
        "{}",
        format!(
            "Opening tunnel: 127.0.0.1:{} → {}:{} via {}@{}",
            spec.db_port, spec.db_host, spec.db_port, spec.jump_user, spec.jump_host
        )
        .green()
        .bold()
    );
    println!();

    let host = SystemProcessHost::new();
    let sink = StdoutSink;
    open_tunnel(&spec, &host, &sink).context("Failed to open tunnel")?;

    println!();
    println!(
        "Check it with: {}",
        format!("db-tunnel test -p {} -u <user> -d <database>", spec.db_port).yellow()
    );

    Ok(())
}

fn list_cmd(key: KeySource) -> Result<()> {
    let key_path = key.resolve()?;
    let host = SystemProcessHost::new();
    let sink = StdoutSink;

    list_tunnels(&key_path, &host, &sink).context("Failed to list tunnels")?;
    Ok(())
}

fn kill_cmd(key: KeySource) -> Result<()> {
    let key_path = key.resolve()?;
    let host = SystemProcessHost::new();
    let sink = StdoutSink;

    let pids = kill_tunnels(&key_path, &host, &sink).context("Failed to kill tunnels")?;

    if !pids.is_empty() {
        println!();
        println!(
            "{}",
            format!("✓ Sent SIGTERM to {} process(es)", pids.len())
                .green()
                .bold()
        );
    }

    Ok(())
}

async fn test_cmd(
    profile_name: Option<String>,
    db_port: Option<u16>,
    db_user: Option<String>,
    db_name: Option<String>,
    sql: Option<String>,
    timeout: u64,
) -> Result<()> {
    // Resolve parameters from the profile or from flags
    let (port, user, database, stored_profile) = if let Some(name) = &profile_name {
        let profile = load_profile_by_name(&profiles_dir()?, name)?;
        (
            profile.database.port,
            profile.database.user.clone(),
            profile.database.name.clone(),
            Some(profile),
        )
    } else {
        let port =
            db_port.ok_or_else(|| anyhow::anyhow!("--db-port is required without --profile"))?;
        let user =
            db_user.ok_or_else(|| anyhow::anyhow!("--db-user is required without --profile"))?;
        let database =
            db_name.ok_or_else(|| anyhow::anyhow!("--db-name is required without --profile"))?;
        (port, user, database, None)
    };

    let password = resolve_password(stored_profile.as_ref())?;

    let mut request = VerifyRequest::new(port, &user, &password, &database)
        .with_timeout(Duration::from_secs(timeout));
    if let Some(sql) = &sql {
        request = request.with_sql(sql);
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message(format!("Testing tunnel on 127.0.0.1:{}...", port));
    spinner.enable_steady_tick(Duration::from_millis(100));

    // Collect status lines so the spinner doesn't tear them up
    let sink = MemorySink::new();
    let result = verify_tunnel(&request, &sink).await;
    spinner.finish_and_clear();

    for line in sink.lines() {
        println!("{}", line);
    }

    let ok = result.context("Database error while testing tunnel")?;
    println!();
    if ok {
        println!("{}", "✓ Tunnel is working".green().bold());
    } else {
        println!(
            "{}",
            format!(
                "Verification timed out after {}s: tunnel is not answering on port {}",
                timeout, port
            )
            .yellow()
        );
        std::process::exit(1);
    }

    Ok(())
}

/// Database password for a test run: keychain if the profile stored it,
/// otherwise an interactive prompt.
fn resolve_password(profile: Option<&Profile>) -> Result<Zeroizing<String>> {
    if let Some(profile) = profile {
        if profile.database.password_stored {
            let entry = keyring::Entry::new(KEYCHAIN_SERVICE, &profile.metadata.id.to_string())
                .context("Failed to open keychain entry")?;
            match entry.get_password() {
                Ok(password) => return Ok(Zeroizing::new(password)),
                Err(e) => {
                    println!(
                        "{}",
                        format!("⚠️  Could not read keychain entry ({}), prompting instead", e)
                            .yellow()
                    );
                }
            }
        }
    }

    let password = Password::new()
        .with_prompt("Database password")
        .interact()
        .context("Failed to read password input")?;
    Ok(Zeroizing::new(password))
}

fn add_cmd(
    name: String,
    key_path: Option<String>,
    db_host: Option<String>,
    db_port: Option<u16>,
    db_name: Option<String>,
    db_user: Option<String>,
    jump_user: Option<String>,
    jump_host: Option<String>,
    non_interactive: bool,
    store_password: bool,
) -> Result<()> {
    println!("{}", "Creating new tunnel profile".bold().green());
    println!();

    let dir = profiles_dir()?;

    if profile_exists_by_name(&dir, &name) {
        anyhow::bail!(
            "A profile with the name '{}' already exists. Choose a different name or delete it first.",
            name.yellow()
        );
    }

    let key_path = gather(key_path, non_interactive, "Path to SSH private key")?;
    let key_path = expand_path(&key_path);
    validate_key_file(&key_path)?;

    let db_host = gather(db_host, non_interactive, "Database host (private endpoint)")?;

    let db_port = if let Some(port) = db_port {
        port
    } else if non_interactive {
        3306
    } else {
        Input::<u16>::new()
            .with_prompt("Database port")
            .default(3306)
            .interact_text()?
    };

    let db_name = gather(db_name, non_interactive, "Database/schema name")?;
    let db_user = gather(db_user, non_interactive, "Database username")?;
    let jump_user = gather(jump_user, non_interactive, "Jump host OS user")?;
    let jump_host = gather(jump_host, non_interactive, "Jump host public address")?;

    let mut profile = Profile::new(
        name.clone(),
        TunnelConfig {
            key_path,
            jump_user: jump_user.clone(),
            jump_host: jump_host.clone(),
        },
        DatabaseConfig {
            host: db_host.clone(),
            port: db_port,
            name: db_name,
            user: db_user.clone(),
            password_stored: false,
        },
    );

    // Password goes to the keychain, never into the profile file
    let wants_store = store_password
        || (!non_interactive
            && Confirm::new()
                .with_prompt("Store database password in system keychain?")
                .default(false)
                .interact()?);

    if wants_store {
        let password = Zeroizing::new(
            Password::new()
                .with_prompt("Database password")
                .interact()?,
        );
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, &profile.metadata.id.to_string())
            .context("Failed to create keychain entry")?;
        entry
            .set_password(&password)
            .context("Failed to store password in keychain")?;
        profile.database.password_stored = true;
        println!("{}", "  ✓ Password stored in system keychain".green());
    }

    profile.validate().context("Profile validation failed")?;
    let path = save_profile(&dir, &profile)?;

    println!();
    println!("{}", "✓ Profile created successfully!".green().bold());
    println!("  Saved to: {}", path.display().to_string().dimmed());
    println!();
    println!("{}", "Profile Summary:".bold());
    println!("  Name: {}", name.cyan());
    println!("  Database: {}@{}:{}", db_user, db_host, db_port);
    println!("  Jump host: {}@{}", jump_user, jump_host);
    println!("  Key: {}", profile.tunnel.key_path.display());
    println!();
    println!(
        "Open the tunnel with: {}",
        format!("db-tunnel open --profile {}", name).yellow()
    );

    Ok(())
}

/// Take a value from a flag, or prompt for it, or fail in non-interactive mode
fn gather(value: Option<String>, non_interactive: bool, prompt: &str) -> Result<String> {
    if let Some(value) = value {
        Ok(value)
    } else if non_interactive {
        anyhow::bail!("{} is required in non-interactive mode", prompt);
    } else {
        Ok(Input::new().with_prompt(prompt).interact_text()?)
    }
}

fn validate_key_file(key_path: &PathBuf) -> Result<()> {
    if !key_path.exists() {
        anyhow::bail!("SSH key not found: {}", key_path.display());
    }

    if !key_path.is_file() {
        anyhow::bail!("SSH key path is not a file: {}", key_path.display());
    }

    // Check permissions (Unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(key_path)?;
        let mode = metadata.permissions().mode();

        // SSH keys should be 0600 or 0400; ssh itself will refuse otherwise
        if mode & 0o077 != 0 {
            println!(
                "{}",
                format!(
                    "⚠️  SSH key has insecure permissions: {:o}\n   \
                     Fix with: chmod 600 {}",
                    mode & 0o777,
                    key_path.display()
                )
                .yellow()
            );
        }
    }

    Ok(())
}

fn profiles_cmd(json: bool) -> Result<()> {
    let mut profiles = load_all_profiles(&profiles_dir()?)?;

    if profiles.is_empty() {
        println!("{}", "No profiles found.".yellow());
        println!("Create one with: {}", "db-tunnel add <name>".cyan());
        return Ok(());
    }

    // Sort profiles by name
    profiles.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    if json {
        println!("{}", serde_json::to_string_pretty(&profiles)?);
    } else {
        print_profiles_table(&profiles);
    }

    Ok(())
}

fn print_profiles_table(profiles: &[Profile]) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Name")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("Database")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("Jump Host")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
        Cell::new("Key")
            .add_attribute(Attribute::Bold)
            .fg(Color::Cyan),
    ]);

    for profile in profiles {
        let database = format!(
            "{}@{}:{}/{}",
            profile.database.user,
            profile.database.host,
            profile.database.port,
            profile.database.name
        );
        let jump = format!("{}@{}", profile.tunnel.jump_user, profile.tunnel.jump_host);

        table.add_row(vec![
            Cell::new(&profile.metadata.name).fg(Color::Green),
            Cell::new(database),
            Cell::new(jump),
            Cell::new(profile.tunnel.key_path.display().to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{}", table);
    println!();
    println!("{} profile(s) found", profiles.len().to_string().cyan());
    println!();
}

fn delete_cmd(name: String) -> Result<()> {
    let dir = profiles_dir()?;

    if !profile_exists_by_name(&dir, &name) {
        anyhow::bail!("Profile '{}' not found", name.yellow());
    }

    let confirm = Confirm::new()
        .with_prompt(format!(
            "Are you sure you want to delete profile '{}'?",
            name.yellow()
        ))
        .default(false)
        .interact()?;

    if !confirm {
        println!("{}", "Deletion cancelled".dimmed());
        return Ok(());
    }

    // Drop the keychain entry too; missing entries are fine
    if let Ok(profile) = load_profile_by_name(&dir, &name) {
        if let Ok(entry) = keyring::Entry::new(KEYCHAIN_SERVICE, &profile.metadata.id.to_string())
        {
            let _ = entry.delete_credential();
        }
    }

    let path = delete_profile_by_name(&dir, &name)?;

    println!();
    println!(
        "{}",
        format!("Profile '{}' deleted successfully", name).green()
    );
    println!("  Removed: {}", path.display().to_string().dimmed());
    println!();

    Ok(())
}
