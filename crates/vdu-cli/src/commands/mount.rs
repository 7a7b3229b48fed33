//! Mount command - expose the volume and keep the session alive.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use secrecy::SecretString;
use tracing::{instrument, warn};
use vdu_mount::{FuseBackend, FuseOptions, MountPoint, VolumeHost};
use vdu_provider::ProviderConfig;
use vdu_session::{
    HttpApi, RefreshPolicy, RefreshScheduler, Session, SessionApi, SessionClient, parse_server_url,
};

use crate::config::{Config, State};
use crate::gate::SessionGate;

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    /// Drive letter ("V:") or mount directory
    #[arg(long, value_name = "X:")]
    pub drive: Option<String>,

    /// Backing directory of the volume
    #[arg(long, value_name = "DIR")]
    pub cache: Option<PathBuf>,

    /// Server URL (overrides the configuration file)
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// Deny filesystem access while logged out
    #[arg(long)]
    pub require_login: bool,

    /// Log in as USER before mounting
    #[arg(long, value_name = "USER", requires = "password")]
    pub user: Option<String>,

    /// Password for --user
    #[arg(long, env = "VDU_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[instrument(level = "info", name = "cmd::mount", skip_all)]
pub fn execute(args: &Args, config: &Config) -> Result<()> {
    let mount_point: MountPoint = args
        .drive
        .as_deref()
        .unwrap_or(&config.drive.letter)
        .parse()?;
    let cache_dir = args.cache.clone().unwrap_or_else(|| config.drive.cache_dir.clone());
    let require_login = args.require_login || config.drive.require_login;

    let mut state = State::load();
    let server = config
        .server_url(args.server.as_deref(), &state)
        .map(|raw| parse_server_url(&raw))
        .transpose()?;
    let session = Session::new(server);
    let policy = RefreshPolicy::from(config.refresh);
    let api: Arc<dyn SessionApi> = Arc::new(HttpApi::new(policy.request_timeout)?);

    let mut provider_config = ProviderConfig::default().volume_label(config.drive.volume_label.clone());
    if require_login {
        provider_config = provider_config.gate(Arc::new(SessionGate::new(session.clone())));
    }
    let backend = FuseBackend::new(
        FuseOptions::default()
            .drive_root(config.drive.drive_root.clone())
            .volume_name(config.drive.volume_label.clone()),
    );
    let mut host = VolumeHost::new(&cache_dir, provider_config, Box::new(backend))
        .with_context(|| format!("Failed to prepare cache root {}", cache_dir.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let _guard = runtime.enter();

    if let (Some(user), Some(password)) = (&args.user, &args.password) {
        let client = SessionClient::new(session.clone(), Arc::clone(&api), policy.request_timeout);
        runtime
            .block_on(client.login(user, SecretString::from(password.as_str())))
            .with_context(|| format!("Login as {user} failed"))?;
        eprintln!("Logged in as {user}");
        if let Some(url) = client.get_server_url() {
            state.last_server = Some(url.to_string());
            if let Err(e) = state.save() {
                warn!("Failed to remember server: {e:#}");
            }
        }
    } else if require_login {
        eprintln!("Not logged in: the volume stays inaccessible until a login succeeds");
    }

    let scheduler = RefreshScheduler::spawn(session, api, policy);

    eprintln!("Mounting volume at {mount_point}...");
    host.start(mount_point).context("Failed to mount volume")?;
    if let Some(path) = host.mounted_path() {
        eprintln!("Volume mounted at {}", path.display());
    }
    eprintln!("Press Ctrl+C to unmount and exit");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;
    let _ = rx.recv();

    eprintln!("Unmounting...");
    runtime.block_on(scheduler.shutdown());
    host.stop().context("Failed to unmount")?;
    eprintln!("Unmounted successfully");
    Ok(())
}
