//! Status command - show the resolved configuration and cache root state.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;
use vdu_mount::{CacheRoot, MountError, MountPoint};

use crate::config::{self, Config, RefreshConfig, State};

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum CacheState {
    Missing,
    Available,
    /// Locked by a running host.
    InUse,
    Error(String),
}

impl CacheState {
    /// Probes the cache root without creating it.
    ///
    /// An existing root is briefly locked, so a mounted volume shows as
    /// in use.
    pub fn probe(path: &Path) -> Self {
        if !path.exists() {
            return Self::Missing;
        }
        match CacheRoot::prepare(path) {
            Ok(_) => Self::Available,
            Err(MountError::Locked(_)) => Self::InUse,
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    config_dir: PathBuf,
    server: Option<String>,
    mount_point: String,
    mount_path: PathBuf,
    cache_dir: PathBuf,
    cache: CacheState,
    volume_label: String,
    require_login: bool,
    refresh: RefreshConfig,
}

#[instrument(level = "info", name = "cmd::status", skip_all)]
pub fn execute(args: &Args, config: &Config) -> Result<()> {
    let mount_point: MountPoint = config.drive.letter.parse()?;
    let report = StatusReport {
        config_dir: config::config_dir()?,
        server: config.server_url(None, &State::load()),
        mount_path: mount_point.resolve(&config.drive.drive_root),
        mount_point: mount_point.to_string(),
        cache: CacheState::probe(&config.drive.cache_dir),
        cache_dir: config.drive.cache_dir.clone(),
        volume_label: config.drive.volume_label.clone(),
        require_login: config.drive.require_login,
        refresh: config.refresh,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let cache = match &report.cache {
        CacheState::Missing => "not created".to_string(),
        CacheState::Available => "available".to_string(),
        CacheState::InUse => "in use by a mounted volume".to_string(),
        CacheState::Error(e) => format!("unusable ({e})"),
    };
    println!("Config:        {}", report.config_dir.display());
    println!("Server:        {}", report.server.as_deref().unwrap_or("(not set)"));
    println!(
        "Mount point:   {} ({})",
        report.mount_point,
        report.mount_path.display()
    );
    println!("Cache root:    {} [{cache}]", report.cache_dir.display());
    println!("Volume label:  {}", report.volume_label);
    println!("Require login: {}", if report.require_login { "yes" } else { "no" });
    println!(
        "Refresh:       renew {:?} before expiry, poll every {:?}, back off {:?}",
        report.refresh.threshold, report.refresh.poll_interval, report.refresh.backoff
    );
    Ok(())
}
