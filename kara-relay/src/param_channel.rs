//! Hot-reload parameter file
//!
//! The engine polls a `key=value` text file for the hot effect parameters.
//! Every write merges into the keys already present, so successive partial
//! updates never lose a key. The file is rewritten whole through a temporary
//! sibling and a rename, so the engine never reads a half-written file.
//!
//! Delivery is at-least-once and eventually consistent: latency is whatever
//! the engine's poll interval is.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parsed parameter file contents
pub type Params = BTreeMap<String, String>;

/// Merge `updates` over `existing`; later values win
pub fn merge_params<I, K, V>(existing: &Params, updates: I) -> Params
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut merged = existing.clone();
    for (key, value) in updates {
        merged.insert(key.into(), value.into());
    }
    merged
}

/// Parse `key=value` lines
///
/// Lines without `=`, or with an empty key or value after trimming, are
/// ignored.
pub fn parse_params(text: &str) -> Params {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

/// Render params as `key=value` lines, each newline-terminated
pub fn render_params(params: &Params) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}\n", key, value))
        .collect()
}

/// The parameter file shared with the engine
#[derive(Debug, Clone)]
pub struct ParamChannel {
    path: PathBuf,
}

impl ParamChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current file; a missing file reads as empty
    pub async fn read_params(&self) -> std::io::Result<Params> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(parse_params(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Params::new()),
            Err(e) => Err(e),
        }
    }

    /// Merge `updates` into the file
    ///
    /// Returns the full contents written.
    pub async fn write_params<I, K, V>(&self, updates: I) -> std::io::Result<Params>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let current = self.read_params().await?;
        let merged = merge_params(&current, updates);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, render_params(&merged)).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Wrote {} parameters to {}", merged.len(), self.path.display());
        Ok(merged)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "params".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
