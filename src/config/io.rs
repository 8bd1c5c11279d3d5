use std::env::current_exe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::OpenOptions;
use std::str;
use log::{info, warn};

use crate::config::types::Config;
use crate::error::ConfigError;

// <exe>.json next to the executable, for portable installs
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// betterback.json in an os dependent standard directory, such as ~/.config/betterback on linux
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("app", "betterback", "betterback").map(|dirs| {
        dirs.config_dir().join("betterback.json")
    })
}

pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        if let Ok(attr) = std::fs::metadata(&path) {
            if attr.is_file() {
                return Ok(path);
            }
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    /// Only one process may drive the device at a time; the config file lock enforces that.
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    path: PathBuf,
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync() -> Result<Self, ConfigError> {
        Self::open_sync(get_config_path()?)
    }

    pub fn open_sync(path: PathBuf) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(&path)?;

        let inner = ConfigIOInner { path, file };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn path(&self) -> PathBuf {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        inner.path.clone()
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?;
        Ok(File::from_std(file))
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ReconnectPolicy;

    fn temp_config_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("betterback-test-{}-{}", std::process::id(), name))
            .join("betterback.json")
    }

    #[tokio::test]
    async fn empty_file_reads_as_default() {
        let io = ConfigIO::open_sync(temp_config_path("empty")).unwrap();
        assert_eq!(io.read().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn saved_config_is_read_back() {
        let io = ConfigIO::open_sync(temp_config_path("saved")).unwrap();
        let config = Config {
            reconnect: ReconnectPolicy::Rescan,
            name_filter: Some(String::from("BetterBack")),
            ..Config::default()
        };

        io.save(&config).await.unwrap();
        assert_eq!(io.read().await.unwrap(), config);

        // a shorter document must not leave the tail of the previous one behind
        io.save(&Config::default()).await.unwrap();
        assert_eq!(io.read().await.unwrap(), Config::default());
    }

    #[tokio::test]
    async fn config_write_under_instance_lock() {
        let io = ConfigIO::open_sync(temp_config_path("locked")).unwrap();
        let mut locker = io.locker().unwrap();
        let _guard = locker.lock().unwrap();

        let config = Config { write_deadline_ms: 500, ..Config::default() };
        io.save(&config).await.unwrap();

        let content = std::fs::read_to_string(io.path()).unwrap();
        assert!(content.contains("\"writeDeadlineMs\": 500"));
        assert!(content.contains("\"continuousSettleMs\": 130"), "missing fields are filled in");
        assert_eq!(io.read().await.unwrap(), config);
    }
}
