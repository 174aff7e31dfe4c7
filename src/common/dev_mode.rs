use crate::common::config::StorageConfig;
use crate::common::error::{FaceProofError, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/// Decides where profiles and snapshot reports live. In dev mode everything goes
/// under `./dev_data` so a test run never touches the user's real data.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        let base_dir = if enabled {
            PathBuf::from("./dev_data")
        } else {
            PathBuf::new()
        };

        if enabled {
            fs::create_dir_all(base_dir.join("profiles"))?;
            fs::create_dir_all(base_dir.join("snapshots"))?;
            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn profiles_dir(&self, storage: &StorageConfig) -> Result<PathBuf> {
        if let Some(dir) = &storage.profiles_dir {
            return Ok(dir.clone());
        }
        if self.enabled {
            return Ok(self.base_dir.join("profiles"));
        }
        Ok(project_data_dir()?.join("profiles"))
    }

    pub fn snapshots_dir(&self, storage: &StorageConfig) -> Result<PathBuf> {
        if let Some(dir) = &storage.snapshots_dir {
            return Ok(dir.clone());
        }
        if self.enabled {
            return Ok(self.base_dir.join("snapshots"));
        }
        Ok(project_data_dir()?.join("snapshots"))
    }
}

fn project_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "faceproctor", "FaceProctor")
        .ok_or_else(|| FaceProofError::Storage("Failed to get project dirs".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_storage_dirs_win() {
        let dev = DevMode { enabled: false, base_dir: PathBuf::new() };
        let storage = StorageConfig {
            profiles_dir: Some(PathBuf::from("/tmp/profiles")),
            snapshots_dir: Some(PathBuf::from("/tmp/snaps")),
        };
        assert_eq!(dev.profiles_dir(&storage).unwrap(), PathBuf::from("/tmp/profiles"));
        assert_eq!(dev.snapshots_dir(&storage).unwrap(), PathBuf::from("/tmp/snaps"));
    }

    #[test]
    fn dev_mode_uses_local_base() {
        let dev = DevMode { enabled: true, base_dir: PathBuf::from("./dev_data") };
        let storage = StorageConfig::default();
        assert_eq!(dev.profiles_dir(&storage).unwrap(), PathBuf::from("./dev_data/profiles"));
    }
}
