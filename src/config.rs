use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "galeria", about = "A self-hosted photo gallery and submission server")]
pub struct Cli {
    /// Directory containing the gallery folders
    #[arg(long, default_value = "gallery")]
    pub dir: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3051")]
    pub addr: String,

    /// Path to the admin credentials file
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
}

/// Admin credentials, stored as a small JSON file next to the database.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin123".to_string(),
        }
    }
}

impl Config {
    /// Read the config file, creating it with default credentials when it
    /// does not exist yet. Returns the config and whether it was created.
    pub fn load_or_create(path: &Path) -> anyhow::Result<(Self, bool)> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Config::default();
                config.write(path)?;
                return Ok((config, true));
            }
            Err(e) => return Err(e.into()),
        };

        // Some editors prepend a UTF-8 BOM; tolerate it.
        let data = data
            .strip_prefix(&[0xEF, 0xBB, 0xBF][..])
            .unwrap_or(&data[..]);

        let mut config: Config =
            serde_json::from_slice(data).map_err(|e| anyhow::anyhow!("parse config: {}", e))?;
        config.username = config.username.trim().to_string();
        config.password = config.password.trim().to_string();
        if config.username.is_empty() || config.password.is_empty() {
            anyhow::bail!("config requires non-empty username and password");
        }

        Ok((config, false))
    }

    fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}
