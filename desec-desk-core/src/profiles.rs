//! Profile management.
//!
//! Profiles isolate configuration, credentials, cache, and version history
//! under `<root>/profiles/<name>/`. The top-level `profiles.json` records
//! the set of profiles and which one is active.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::util::fs::atomic_write;

/// Name of the profile created on first start; it can never be deleted.
pub const DEFAULT_PROFILE: &str = "default";

fn profile_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        let re = Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}$").expect("static regex is valid");
        re
    })
}

/// Metadata for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Directory-safe slug; unique.
    pub name: String,
    pub display_name: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfilesFile {
    active: String,
    profiles: Vec<Profile>,
}

/// Manages the profile set and the per-profile directory layout.
pub struct ProfileManager {
    root: PathBuf,
    file: ProfilesFile,
}

impl ProfileManager {
    /// Opens (or initialises) the profile store under `root`.
    ///
    /// On first start this creates the default profile and migrates a legacy
    /// single-profile layout (`<root>/config.json`, `<root>/cache/`) into
    /// `profiles/default/`.
    pub fn open(root: PathBuf) -> CoreResult<Self> {
        std::fs::create_dir_all(root.join("profiles"))?;
        let index_path = root.join("profiles.json");

        let file = if index_path.exists() {
            let text = std::fs::read_to_string(&index_path)?;
            serde_json::from_str(&text)?
        } else {
            let file = ProfilesFile {
                active: DEFAULT_PROFILE.to_string(),
                profiles: vec![Profile {
                    name: DEFAULT_PROFILE.to_string(),
                    display_name: "Default Profile".to_string(),
                    created: Utc::now(),
                    last_used: Some(Utc::now()),
                }],
            };
            log::info!("Initialised profile store at {}", root.display());
            file
        };

        let mut manager = Self { root, file };
        manager.migrate_legacy()?;
        std::fs::create_dir_all(manager.profile_dir(DEFAULT_PROFILE))?;
        manager.save()?;
        Ok(manager)
    }

    /// Moves a pre-profiles layout into `profiles/default/`.
    fn migrate_legacy(&mut self) -> CoreResult<()> {
        let legacy_config = self.root.join("config.json");
        let legacy_cache = self.root.join("cache");
        if !legacy_config.exists() && !legacy_cache.exists() {
            return Ok(());
        }

        log::info!("Migrating legacy single-profile data to the default profile");
        let target = self.profile_dir(DEFAULT_PROFILE);
        std::fs::create_dir_all(&target)?;

        if legacy_config.exists() {
            let dest = target.join("config.json");
            if !dest.exists() {
                std::fs::rename(&legacy_config, &dest)?;
                log::info!("Migrated legacy config to {}", dest.display());
            }
        }
        if legacy_cache.exists() {
            let dest = target.join("cache");
            if !dest.exists() {
                std::fs::rename(&legacy_cache, &dest)?;
                log::info!("Migrated legacy cache to {}", dest.display());
            }
        }
        Ok(())
    }

    fn save(&self) -> CoreResult<()> {
        let json = serde_json::to_vec_pretty(&self.file)?;
        atomic_write(&self.root.join("profiles.json"), &json)?;
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&Profile> {
        self.file.profiles.iter().find(|p| p.name == name)
    }

    /// Application root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the active profile.
    #[must_use]
    pub fn active(&self) -> &str {
        &self.file.active
    }

    /// All profiles, most recently used first.
    #[must_use]
    pub fn list(&self) -> Vec<Profile> {
        let mut profiles = self.file.profiles.clone();
        profiles.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        profiles
    }

    /// Directory owned by `name`.
    #[must_use]
    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.root.join("profiles").join(name)
    }

    #[must_use]
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.profile_dir(name).join("config.json")
    }

    #[must_use]
    pub fn salt_path(&self, name: &str) -> PathBuf {
        self.profile_dir(name).join("salt")
    }

    #[must_use]
    pub fn cache_dir(&self, name: &str) -> PathBuf {
        self.profile_dir(name).join("cache")
    }

    #[must_use]
    pub fn versions_dir(&self, name: &str) -> PathBuf {
        self.profile_dir(name).join("versions")
    }

    /// Creates a new profile.
    pub fn create(&mut self, name: &str, display_name: &str) -> CoreResult<()> {
        if !profile_name_re().is_match(name) {
            return Err(CoreError::InvalidProfileName(name.to_string()));
        }
        if self.find(name).is_some() {
            return Err(CoreError::ProfileExists(name.to_string()));
        }

        std::fs::create_dir_all(self.profile_dir(name))?;
        self.file.profiles.push(Profile {
            name: name.to_string(),
            display_name: if display_name.is_empty() {
                name.to_string()
            } else {
                display_name.to_string()
            },
            created: Utc::now(),
            last_used: None,
        });
        self.save()?;
        log::info!("Created profile '{name}'");
        Ok(())
    }

    /// Changes a profile's display name. The slug is fixed for life: it is
    /// baked into the on-disk layout.
    pub fn rename(&mut self, name: &str, new_display_name: &str) -> CoreResult<()> {
        let profile = self
            .file
            .profiles
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| CoreError::ProfileNotFound(name.to_string()))?;
        profile.display_name = new_display_name.to_string();
        self.save()?;
        Ok(())
    }

    /// Switches the active profile, updating its last-used timestamp.
    ///
    /// The caller is responsible for rebuilding all per-profile subsystems.
    pub fn switch(&mut self, name: &str) -> CoreResult<Profile> {
        if self.find(name).is_none() {
            return Err(CoreError::ProfileNotFound(name.to_string()));
        }
        std::fs::create_dir_all(self.profile_dir(name))?;

        self.file.active = name.to_string();
        let now = Utc::now();
        if let Some(profile) = self.file.profiles.iter_mut().find(|p| p.name == name) {
            profile.last_used = Some(now);
        }
        self.save()?;
        log::info!("Switched to profile '{name}'");

        // find() succeeded above, so the clone is always present.
        #[allow(clippy::expect_used)]
        let profile = self.find(name).cloned().expect("profile exists");
        Ok(profile)
    }

    /// Deletes a profile and all of its data. The active profile and the
    /// default profile are protected.
    pub fn delete(&mut self, name: &str) -> CoreResult<()> {
        if name == DEFAULT_PROFILE || name == self.file.active {
            return Err(CoreError::ProfileProtected(name.to_string()));
        }
        if self.find(name).is_none() {
            return Err(CoreError::ProfileNotFound(name.to_string()));
        }

        let dir = self.profile_dir(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.file.profiles.retain(|p| p.name != name);
        self.save()?;
        log::info!("Deleted profile '{name}'");
        Ok(())
    }
}
