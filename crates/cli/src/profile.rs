// db-tunnel - CLI Profile Module
// Named tunnel parameter sets, one TOML file per profile

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use db_tunnel_common::TunnelSpec;

/// Complete tunnel profile: everything needed to open, find, kill, and test
/// one database tunnel, minus the database password (which lives in the
/// system keychain or is prompted for, never in this file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(flatten)]
    pub metadata: ProfileMetadata,
    pub tunnel: TunnelConfig,
    pub database: DatabaseConfig,
}

/// Profile metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMetadata {
    /// Unique profile identifier (also the keychain entry name)
    pub id: Uuid,
    /// Human-readable profile name
    pub name: String,
    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Profile creation timestamp
    pub created_at: DateTime<Utc>,
    /// Profile last modification timestamp
    pub modified_at: DateTime<Utc>,
}

/// SSH side of the tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Private key for the jump host
    pub key_path: PathBuf,
    /// OS user on the jump host
    pub jump_user: String,
    /// Public address of the jump host
    pub jump_host: String,
}

/// Database side of the tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Endpoint as seen from the jump host (private IP, RDS endpoint, ...)
    pub host: String,
    /// Database port, also the local bind port (default: 3306)
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Database/schema name
    pub name: String,
    /// Database username
    pub user: String,
    /// Whether the password is stored in the system keychain
    #[serde(default)]
    pub password_stored: bool,
}

fn default_db_port() -> u16 {
    3306
}

impl Profile {
    /// Create a new profile with a fresh id and timestamps
    pub fn new(name: String, tunnel: TunnelConfig, database: DatabaseConfig) -> Self {
        let now = Utc::now();
        Self {
            metadata: ProfileMetadata {
                id: Uuid::new_v4(),
                name,
                description: None,
                created_at: now,
                modified_at: now,
            },
            tunnel,
            database,
        }
    }

    /// Check the profile for obviously unusable values
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.trim().is_empty() {
            anyhow::bail!("Profile name cannot be empty");
        }
        if self.tunnel.key_path.as_os_str().is_empty() {
            anyhow::bail!("Key path cannot be empty");
        }
        if self.tunnel.jump_host.trim().is_empty() || self.tunnel.jump_user.trim().is_empty() {
            anyhow::bail!("Jump host and jump user cannot be empty");
        }
        if self.database.host.trim().is_empty() {
            anyhow::bail!("Database host cannot be empty");
        }
        Ok(())
    }

    /// The library-level spec for this profile's tunnel
    pub fn tunnel_spec(&self) -> TunnelSpec {
        TunnelSpec {
            key_path: self.tunnel.key_path.clone(),
            db_host: self.database.host.clone(),
            db_port: self.database.port,
            jump_user: self.tunnel.jump_user.clone(),
            jump_host: self.tunnel.jump_host.clone(),
        }
    }
}

/// Get the default profiles directory path
pub fn profiles_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(config_dir.join("db-tunnel").join("profiles"))
}

/// Load all profiles from `dir`, skipping unparsable files with a warning
pub fn load_all_profiles(dir: &Path) -> Result<Vec<Profile>> {
    if !dir.exists() {
        debug!("Profiles directory does not exist: {}", dir.display());
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).context("Failed to read profiles directory")?;

    let mut profiles = Vec::new();

    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        // Skip non-TOML files
        if path.extension().and_then(|s| s.to_str()) != Some("toml") {
            continue;
        }

        match load_profile(&path) {
            Ok(profile) => {
                debug!(
                    "Loaded profile: {} ({})",
                    profile.metadata.name, profile.metadata.id
                );
                profiles.push(profile);
            }
            Err(e) => {
                warn!("Failed to load profile {}: {}", path.display(), e);
            }
        }
    }

    Ok(profiles)
}

/// Load a single profile from a path
pub fn load_profile(path: &Path) -> Result<Profile> {
    let contents =
        fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;

    let profile: Profile =
        toml::from_str(&contents).context(format!("Failed to parse {}", path.display()))?;

    Ok(profile)
}

/// Load a single profile by its name
pub fn load_profile_by_name(dir: &Path, name: &str) -> Result<Profile> {
    load_all_profiles(dir)?
        .into_iter()
        .find(|p| p.metadata.name == name)
        .ok_or_else(|| anyhow::anyhow!("Profile '{}' not found", name))
}

/// Check whether a profile with this name exists
pub fn profile_exists_by_name(dir: &Path, name: &str) -> bool {
    load_profile_by_name(dir, name).is_ok()
}

/// Save a profile as `<id>.toml` under `dir`, creating the directory if
/// needed. Returns the path written.
pub fn save_profile(dir: &Path, profile: &Profile) -> Result<PathBuf> {
    fs::create_dir_all(dir).context("Failed to create profiles directory")?;

    let path = dir.join(format!("{}.toml", profile.metadata.id));
    let contents = toml::to_string_pretty(profile).context("Failed to serialize profile")?;
    fs::write(&path, contents).context(format!("Failed to write {}", path.display()))?;

    debug!(
        "Saved profile {} to {}",
        profile.metadata.name,
        path.display()
    );
    Ok(path)
}

/// Delete a profile by name. Returns the path that was removed.
pub fn delete_profile_by_name(dir: &Path, name: &str) -> Result<PathBuf> {
    let profile = load_profile_by_name(dir, name)?;
    let path = dir.join(format!("{}.toml", profile.metadata.id));
    fs::remove_file(&path).context(format!("Failed to remove {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> Profile {
        Profile::new(
            name.to_string(),
            TunnelConfig {
                key_path: PathBuf::from("/tmp/k.pem"),
                jump_user: "ubuntu".to_string(),
                jump_host: "1.2.3.4".to_string(),
            },
            DatabaseConfig {
                host: "10.0.0.5".to_string(),
                port: 3306,
                name: "testdb".to_string(),
                user: "admin".to_string(),
                password_stored: false,
            },
        )
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let profile = sample("prod-db");

        save_profile(dir.path(), &profile).unwrap();
        let loaded = load_profile_by_name(dir.path(), "prod-db").unwrap();

        assert_eq!(loaded.metadata.id, profile.metadata.id);
        assert_eq!(loaded.database.port, 3306);
        assert_eq!(loaded.tunnel.jump_user, "ubuntu");
    }

    #[test]
    fn missing_profile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_profile_by_name(dir.path(), "nope").is_err());
        assert!(!profile_exists_by_name(dir.path(), "nope"));
    }

    #[test]
    fn empty_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_all_profiles(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let profile = sample("staging-db");
        let path = save_profile(dir.path(), &profile).unwrap();

        let removed = delete_profile_by_name(dir.path(), "staging-db").unwrap();

        assert_eq!(removed, path);
        assert!(!path.exists());
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let mut profile = sample("x");
        profile.database.host = String::new();
        assert!(profile.validate().is_err());
        assert!(sample("ok").validate().is_ok());
    }

    #[test]
    fn tunnel_spec_mirrors_profile() {
        let spec = sample("x").tunnel_spec();
        assert_eq!(spec.db_port, 3306);
        assert_eq!(spec.jump_host, "1.2.3.4");
        let args = spec.to_args().unwrap();
        assert_eq!(args[6], "3306:10.0.0.5:3306");
    }
}
