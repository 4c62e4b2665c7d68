//! kara-relay configuration
//!
//! Command-line arguments (with environment fallbacks) override the TOML
//! config file, which overrides compiled defaults.

use crate::error::{Error, Result};
use clap::Parser;
use kara_common::config::{load_toml_file, locate_config_file, resolve_path};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_ENGINE_ROOT: &str = "./autotune-app";
pub const DEFAULT_PROGRAM: &str = "python3";
pub const DEFAULT_PROGRAM_ARGS: &[&str] = &["run_karaoke.py"];
pub const PARAM_FILE_NAME: &str = "voice_params.txt";

/// Command-line arguments for kara-relay
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "kara-relay")]
#[command(about = "Karaoke engine control relay")]
#[command(version)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "KARA_PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "KARA_BIND")]
    pub bind: Option<String>,

    /// Song catalog directory
    #[arg(long, env = "KARA_SONGS_DIR")]
    pub songs_dir: Option<PathBuf>,

    /// Engine install root (working directory of the engine process)
    #[arg(long, env = "KARA_ENGINE_ROOT")]
    pub engine_root: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "KARA_CONFIG")]
    pub config: Option<PathBuf>,
}

/// TOML config file layout
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub songs_dir: Option<PathBuf>,
    pub engine: EngineSection,
    pub timing: TimingSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub root: Option<PathBuf>,
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub param_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub grace_period_ms: Option<u64>,
    pub restart_delay_ms: Option<u64>,
    pub autostart_delay_ms: Option<u64>,
    pub tick_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
}

/// How to launch the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Working directory of the engine process
    pub root: PathBuf,
    pub program: String,
    /// Arguments placed before the song directory name
    pub args: Vec<String>,
    pub param_file: PathBuf,
}

/// Supervisor timers
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Wait between SIGTERM and SIGKILL
    pub grace_period: Duration,
    /// Settling delay before relaunching after a cold effect change
    pub restart_delay: Duration,
    /// Delay between `song_loaded` and the automatic start
    pub autostart_delay: Duration,
    /// `tick` period; `None` disables ticks
    pub tick_interval: Option<Duration>,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(5000),
            restart_delay: Duration::from_millis(1000),
            autostart_delay: Duration::from_millis(500),
            tick_interval: Some(Duration::from_millis(1000)),
        }
    }
}

/// Resolved relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub songs_dir: PathBuf,
    pub engine: EngineConfig,
    pub timing: Timing,
    pub log_level: Option<String>,
}

impl Config {
    /// Defaults for an engine installed at `root`
    pub fn with_engine_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            songs_dir: root.join("songs"),
            engine: EngineConfig {
                param_file: root.join(PARAM_FILE_NAME),
                program: DEFAULT_PROGRAM.to_string(),
                args: DEFAULT_PROGRAM_ARGS.iter().map(|s| s.to_string()).collect(),
                root,
            },
            timing: Timing::default(),
            log_level: None,
        }
    }

    /// Load the config file named by `args` (or the platform default) and merge
    pub fn load(args: &Args) -> Result<Self> {
        let path = locate_config_file(args.config.as_deref());
        let file: TomlConfig = load_toml_file(path.as_deref())?;
        Self::from_parts(args, file)
    }

    /// Merge arguments over config file values over defaults
    pub fn from_parts(args: &Args, file: TomlConfig) -> Result<Self> {
        let engine_root = resolve_path(
            args.engine_root.clone(),
            file.engine.root.as_deref(),
            Path::new(""),
            || PathBuf::from(DEFAULT_ENGINE_ROOT),
        );
        let defaults = Config::with_engine_root(&engine_root);

        let songs_dir = resolve_path(
            args.songs_dir.clone(),
            file.songs_dir.as_deref(),
            &engine_root,
            || defaults.songs_dir.clone(),
        );
        let param_file = resolve_path(
            None,
            file.engine.param_file.as_deref(),
            &engine_root,
            || defaults.engine.param_file.clone(),
        );

        let port = args.port.or(file.port).unwrap_or(DEFAULT_PORT);
        let bind = args
            .bind
            .clone()
            .or(file.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let ip: IpAddr = bind
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {:?}: {}", bind, e)))?;

        let engine = EngineConfig {
            root: engine_root,
            program: file.engine.program.unwrap_or(defaults.engine.program),
            args: file.engine.args.unwrap_or(defaults.engine.args),
            param_file,
        };
        if engine.program.trim().is_empty() {
            return Err(Error::Config("engine program must not be empty".to_string()));
        }

        let base = Timing::default();
        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        let timing = Timing {
            grace_period: ms(file.timing.grace_period_ms, base.grace_period),
            restart_delay: ms(file.timing.restart_delay_ms, base.restart_delay),
            autostart_delay: ms(file.timing.autostart_delay_ms, base.autostart_delay),
            tick_interval: match file.timing.tick_interval_ms {
                Some(0) => None,
                Some(n) => Some(Duration::from_millis(n)),
                None => base.tick_interval,
            },
        };

        Ok(Config {
            bind_addr: SocketAddr::new(ip, port),
            songs_dir,
            engine,
            timing,
            log_level: file.logging.level,
        })
    }
}
