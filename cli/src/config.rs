//! Settings for talking to the device.
//!
//! Layered from lowest to highest precedence: built-in defaults, an optional
//! `config.json5` in the user's config directory, `SHIFTY_*` environment
//! variables, then command-line flags.

use std::{env, path::PathBuf, time::Duration};

use color_eyre::{Result, eyre::WrapErr};
use config::{ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use lazy_static::lazy_static;
use serde::Deserialize;

use crate::cli::Cli;

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase();
    pub static ref CONFIG_FOLDER: Option<PathBuf> =
        env::var(format!("{}_CONFIG", PROJECT_NAME.clone()))
            .ok()
            .map(PathBuf::from);
}

const ENV_PREFIX: &str = "SHIFTY";
const DEFAULT_BAUD_RATE: i64 = 12_000_000;
const DEFAULT_TIMEOUT_MS: i64 = 2000;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = get_config_dir().join("config.json5");
        let builder = defaults()?
            .add_source(
                File::from(path.clone())
                    .format(FileFormat::Json5)
                    .required(false),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        let config = build(builder)
            .wrap_err_with(|| format!("loading configuration ({})", path.display()))?;
        Ok(config.with_overrides(cli))
    }

    /// Command-line flags win over everything else.
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(port) = &cli.port {
            self.port = Some(port.clone());
        }
        if let Some(baud_rate) = cli.baud_rate {
            self.baud_rate = baud_rate;
        }
        if let Some(timeout_ms) = cli.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(config::Config::builder()
        .set_default("baud_rate", DEFAULT_BAUD_RATE)?
        .set_default("timeout_ms", DEFAULT_TIMEOUT_MS)?)
}

fn build(builder: ConfigBuilder<DefaultState>) -> Result<Config> {
    Ok(builder.build()?.try_deserialize()?)
}

pub fn get_config_dir() -> PathBuf {
    if let Some(dir) = CONFIG_FOLDER.clone() {
        dir
    } else if let Some(dirs) = project_directory() {
        dirs.config_local_dir().to_path_buf()
    } else {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".config")
    }
}

fn project_directory() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "shifty", "shifty")
}
