//! Global configuration for the fetch core.
//!
//! Configuration only covers the behavior of the tool itself, most notably
//! where the global content-addressed cache lives; per-package information
//! belongs in the package's own manifest.

use std::{env, path::PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub directories: Directories,
}

impl Config {
    /// Layered configuration: the user-wide file, then the working
    /// directory's file, then `QUARRY_*` environment variables.
    pub fn new() -> Result<Config, config::ConfigError> {
        let mut c = config::Config::new();

        c.merge(
            config::File::with_name(
                format!(
                    "{}/.quarry/config",
                    BaseDirs::new().unwrap().home_dir().display()
                )
                .as_ref(),
            )
            .format(config::FileFormat::Toml)
            .required(false),
        )?;

        if let Ok(cwd) = env::current_dir() {
            c.merge(
                config::File::from(cwd.join(".quarry/config"))
                    .format(config::FileFormat::Toml)
                    .required(false),
            )?;
        }

        c.merge(config::Environment::with_prefix("quarry"))?;

        c.try_into()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            directories: Directories::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Directories {
    /// Root of the global content-addressed cache.
    pub cache: PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        Directories {
            cache: BaseDirs::new().unwrap().home_dir().join(".quarry"),
        }
    }
}
