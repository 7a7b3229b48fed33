//! Harness command - run session actions in command-line order.
//!
//! ```text
//! vdu harness --server vdu.example --login alice:pw --fetch f1=out.bin --logout
//! ```
//!
//! Each action waits for its connection task to finish. The first failure
//! stops the run and becomes the exit status.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgMatches, Args as ClapArgs};
use secrecy::SecretString;
use tokio::runtime::Runtime;
use tracing::{info, instrument, warn};
use vdu_session::{
    HttpApi, RefreshPolicy, RefreshScheduler, Session, SessionApi, SessionClient, parse_server_url,
};

use crate::config::{Config, State};

/// One scripted session action.
#[derive(Clone, PartialEq, Eq)]
pub enum Action {
    Ping,
    Login { user: String, password: String },
    Logout,
    Fetch { file: String, out: Option<PathBuf> },
    Delete { file: String },
    Rename { file: String, name: String },
    Write { file: String, source: PathBuf },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => write!(f, "ping"),
            Self::Login { user, .. } => write!(f, "login as {user}"),
            Self::Logout => write!(f, "logout"),
            Self::Fetch { file, .. } => write!(f, "fetch {file}"),
            Self::Delete { file } => write!(f, "delete {file}"),
            Self::Rename { file, name } => write!(f, "rename {file} to {name}"),
            Self::Write { file, source } => write!(f, "write {} to {file}", source.display()),
        }
    }
}

// Display never shows the password.
impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({self})")
    }
}

fn non_empty(value: &str, what: &str) -> Result<String, String> {
    if value.is_empty() {
        Err(format!("{what} must not be empty"))
    } else {
        Ok(value.to_string())
    }
}

fn parse_login(raw: &str) -> Result<Action, String> {
    let (user, password) = raw
        .split_once(':')
        .ok_or_else(|| "expected USER:PASSWORD".to_string())?;
    Ok(Action::Login {
        user: non_empty(user, "user")?,
        password: password.to_string(),
    })
}

fn parse_fetch(raw: &str) -> Result<Action, String> {
    let (file, out) = match raw.split_once('=') {
        Some((file, out)) => (file, Some(PathBuf::from(non_empty(out, "output path")?))),
        None => (raw, None),
    };
    Ok(Action::Fetch {
        file: non_empty(file, "file token")?,
        out,
    })
}

fn parse_delete(raw: &str) -> Result<Action, String> {
    Ok(Action::Delete {
        file: non_empty(raw, "file token")?,
    })
}

fn parse_rename(raw: &str) -> Result<Action, String> {
    let (file, name) = raw
        .split_once('=')
        .ok_or_else(|| "expected TOKEN=NAME".to_string())?;
    Ok(Action::Rename {
        file: non_empty(file, "file token")?,
        name: non_empty(name, "new name")?,
    })
}

fn parse_write(raw: &str) -> Result<Action, String> {
    let (file, source) = raw
        .split_once('=')
        .ok_or_else(|| "expected TOKEN=FILE".to_string())?;
    Ok(Action::Write {
        file: non_empty(file, "file token")?,
        source: PathBuf::from(non_empty(source, "source file")?),
    })
}

#[derive(ClapArgs, Clone, Debug)]
pub struct Args {
    /// Server URL (overrides the configuration file)
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// Check that the server answers
    #[arg(long)]
    pub ping: bool,

    /// Log in
    #[arg(long, value_name = "USER:PASSWORD", value_parser = parse_login)]
    pub login: Vec<Action>,

    /// Log out
    #[arg(long)]
    pub logout: bool,

    /// Download a remote file to OUT, or to stdout
    #[arg(long, value_name = "TOKEN[=OUT]", value_parser = parse_fetch)]
    pub fetch: Vec<Action>,

    /// Delete a remote file
    #[arg(long, value_name = "TOKEN", value_parser = parse_delete)]
    pub delete: Vec<Action>,

    /// Rename a remote file
    #[arg(long, value_name = "TOKEN=NAME", value_parser = parse_rename)]
    pub rename: Vec<Action>,

    /// Upload a local file's contents to a remote file
    #[arg(long, value_name = "TOKEN=FILE", value_parser = parse_write)]
    pub write: Vec<Action>,
}

const VALUE_ACTIONS: [&str; 5] = ["login", "fetch", "delete", "rename", "write"];
const FLAG_ACTIONS: [(&str, Action); 2] = [("ping", Action::Ping), ("logout", Action::Logout)];

/// Collects the actions in the order they appeared on the command line.
pub fn ordered_actions(matches: &ArgMatches) -> Vec<Action> {
    let mut indexed: Vec<(usize, Action)> = Vec::new();
    for id in VALUE_ACTIONS {
        if let (Some(indices), Some(values)) = (matches.indices_of(id), matches.get_many::<Action>(id)) {
            indexed.extend(indices.zip(values.cloned()));
        }
    }
    for (id, action) in FLAG_ACTIONS {
        if matches.get_flag(id)
            && let Some(index) = matches.index_of(id)
        {
            indexed.push((index, action));
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, action)| action).collect()
}

#[instrument(level = "info", name = "cmd::harness", skip_all, fields(actions = actions.len()))]
pub fn execute(args: &Args, actions: &[Action], config: &Config) -> Result<()> {
    if actions.is_empty() {
        eprintln!("No actions given. See 'vdu harness --help'.");
        return Ok(());
    }

    let mut state = State::load();
    let server = config
        .server_url(args.server.as_deref(), &state)
        .map(|raw| parse_server_url(&raw))
        .transpose()?;
    let session = Session::new(server);
    let policy = RefreshPolicy::from(config.refresh);
    let api: Arc<dyn SessionApi> = Arc::new(HttpApi::new(policy.request_timeout)?);
    let client = SessionClient::new(session.clone(), Arc::clone(&api), policy.request_timeout);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let _guard = runtime.enter();
    let scheduler = RefreshScheduler::spawn(session, api, policy);

    let result = actions
        .iter()
        .try_for_each(|action| run_action(&runtime, &client, action, &mut state));

    runtime.block_on(scheduler.shutdown());
    result
}

fn run_action(runtime: &Runtime, client: &SessionClient, action: &Action, state: &mut State) -> Result<()> {
    info!(%action, "Running action");
    match action {
        Action::Ping => {
            runtime.block_on(client.ping()).context("Ping failed")?;
            eprintln!("Server reachable");
        }
        Action::Login { user, password } => {
            runtime
                .block_on(client.login(user, SecretString::from(password.as_str())))
                .with_context(|| format!("Login as {user} failed"))?;
            eprintln!("Logged in as {user}");
            remember_server(client, state);
        }
        Action::Logout => {
            runtime.block_on(client.logout()).context("Logout failed")?;
            eprintln!("Logged out");
        }
        Action::Fetch { file, out } => {
            let bytes = runtime
                .block_on(client.fetch_file(file))
                .with_context(|| format!("Failed to fetch {file}"))?;
            match out {
                Some(path) => {
                    fs::write(path, &bytes)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Fetched {file} ({} bytes) to {}", bytes.len(), path.display());
                }
                None => {
                    let mut stdout = io::stdout().lock();
                    stdout.write_all(&bytes)?;
                    stdout.flush()?;
                }
            }
        }
        Action::Delete { file } => {
            runtime
                .block_on(client.delete_file(file))
                .with_context(|| format!("Failed to delete {file}"))?;
            eprintln!("Deleted {file}");
        }
        Action::Rename { file, name } => {
            runtime
                .block_on(client.rename_file(file, name))
                .with_context(|| format!("Failed to rename {file}"))?;
            eprintln!("Renamed {file} to {name}");
        }
        Action::Write { file, source } => {
            let data = fs::read(source)
                .with_context(|| format!("Failed to read {}", source.display()))?;
            let len = data.len();
            runtime
                .block_on(client.write_file(file, data))
                .with_context(|| format!("Failed to write {file}"))?;
            eprintln!("Wrote {len} bytes to {file}");
        }
    }
    Ok(())
}

fn remember_server(client: &SessionClient, state: &mut State) {
    let Some(url) = client.get_server_url() else {
        return;
    };
    let url = url.to_string();
    if state.last_server.as_deref() == Some(url.as_str()) {
        return;
    }
    state.last_server = Some(url);
    if let Err(e) = state.save() {
        warn!("Failed to remember server: {e:#}");
    }
}
