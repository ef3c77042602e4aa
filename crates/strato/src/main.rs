//! Strato - CLI driver for the session spawner.
//!
//! Wraps one session lifecycle controller for one user so the caller
//! contract (`start`/`poll`/`stop`/`teardown`) can be driven from a shell or
//! any orchestrator that can run a process. Multi-user hubs embed the
//! library directly instead.

use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info};
use serde::{Deserialize, Serialize};

use strato::config::SpawnerConfig;
use strato::identity::SessionIdentity;
use strato::provider::ProviderClient;
use strato::session::{LaunchSpec, SessionSpawner, SpawnError};
use strato::storage::ShareClient;

const APP_NAME: &str = "strato";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common)?;

    match cli.command {
        Command::Completions { shell } => {
            handle_completions(shell);
            Ok(())
        }
        Command::Config { command } => handle_config(&cli.common, command),
        command => run_async(cli.common, command),
    }
}

#[tokio::main]
async fn run_async(common: CommonOpts, command: Command) -> Result<()> {
    let file_config = load_file_config(&common)?;

    match command {
        Command::Start {
            user,
            user_id,
            env,
            command,
        } => {
            let spawner = build_spawner(&file_config, &user, user_id)?;
            let launch = LaunchSpec::new(command).envs(parse_env_pairs(&env)?);

            match spawner.start(&launch).await {
                Ok(endpoint) => {
                    if common.json {
                        println!(
                            "{}",
                            serde_json::json!({
                                "address": endpoint.address,
                                "port": endpoint.port,
                            })
                        );
                    } else {
                        println!("{endpoint}");
                    }
                    Ok(())
                }
                Err(e @ SpawnError::SpawnTimeout { .. }) => {
                    bail!("spawn timed out: {e}")
                }
                Err(e) => Err(e).context("starting session"),
            }
        }
        Command::Poll { user, user_id } => {
            let spawner = build_spawner(&file_config, &user, user_id)?;
            let status = spawner.poll().await.context("polling session")?;

            if common.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "ready": status.is_none(),
                        "status": status,
                    })
                );
            } else {
                match status {
                    None => println!("ready"),
                    Some(code) => println!("not ready (status {code})"),
                }
            }
            Ok(())
        }
        Command::Stop { user, user_id } => {
            let spawner = build_spawner(&file_config, &user, user_id)?;
            spawner.stop().await;
            info!("stop acknowledged for {user}");
            Ok(())
        }
        Command::Teardown { user, user_id } => {
            let spawner = build_spawner(&file_config, &user, user_id)?;
            spawner.teardown().await.context("tearing down session")?;
            info!("teardown complete for {user}");
            Ok(())
        }
        Command::Completions { .. } | Command::Config { .. } => unreachable!("handled in try_main"),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Strato - cloud container session spawner.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start (or reuse) the user's session and print its endpoint
    Start {
        /// Username the session belongs to
        #[arg(long)]
        user: String,
        /// Numeric user id, used for placeholder expansion
        #[arg(long, default_value_t = 0)]
        user_id: i64,
        /// Environment variables for the session (KEY=VALUE, repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Command to run in the session container
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Check whether the user's session is ready
    Poll {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 0)]
        user_id: i64,
    },
    /// Stop the user's session without deleting it
    Stop {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 0)]
        user_id: i64,
    },
    /// Delete the user's compute group (storage is preserved)
    Teardown {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 0)]
        user_id: i64,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the resolved configuration (secrets redacted)
    Show,
}

fn effective_log_level(common: &CommonOpts) -> LevelFilter {
    if common.trace {
        LevelFilter::Trace
    } else if common.debug || common.verbose >= 1 {
        LevelFilter::Debug
    } else if common.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    }
}

fn init_logging(common: &CommonOpts) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = match effective_log_level(common) {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(io::stderr().is_terminal())
                    .with_target(false),
            )
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(effective_log_level(common));
    builder.try_init().ok();

    Ok(())
}

/// File-facing configuration, layered from the TOML file and `STRATO__`
/// environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct FileConfig {
    provider: ProviderSection,
    storage: StorageSection,
    session: SessionSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct ProviderSection {
    /// Base URL of the compute provider API.
    url: String,
    /// API token for the compute provider.
    api_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct StorageSection {
    /// Base URL of the storage account's share API.
    url: String,
    /// Storage account name.
    account: String,
    /// Storage account access key.
    access_key: String,
    /// Quota in GB for each user share.
    quota_gb: u32,
    /// Access tier for new shares.
    access_tier: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        let defaults = SpawnerConfig::default();
        Self {
            url: String::new(),
            account: String::new(),
            access_key: String::new(),
            quota_gb: defaults.storage_quota_gb,
            access_tier: defaults.storage_access_tier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct SessionSection {
    image: String,
    registry_server: String,
    registry_username: String,
    registry_password: String,
    location: String,
    subnet_id: String,
    subnet_name: String,
    port: u16,
    cpu_cores: f64,
    memory_gb: f64,
    mount_path: String,
    /// Timeout until spawn fails. Provider spawning is slow, expect several
    /// minutes.
    spawn_timeout_secs: u64,
    poll_interval_secs: u64,
    probe_timeout_secs: u64,
    /// Extra paths prepended to PATH; {USERNAME} and {USERID} are expanded.
    extra_paths: Vec<String>,
    /// Static environment merged into every launch.
    extra_env: HashMap<String, String>,
    /// Env var names scanned to recover a session API token on reuse.
    api_token_vars: Vec<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SpawnerConfig::default();
        Self {
            image: String::new(),
            registry_server: String::new(),
            registry_username: String::new(),
            registry_password: String::new(),
            location: String::new(),
            subnet_id: String::new(),
            subnet_name: String::new(),
            port: defaults.port,
            cpu_cores: defaults.cpu_cores,
            memory_gb: defaults.memory_gb,
            mount_path: defaults.mount_path,
            spawn_timeout_secs: defaults.spawn_timeout.as_secs(),
            poll_interval_secs: defaults.poll_interval.as_secs(),
            probe_timeout_secs: defaults.probe_timeout.as_secs(),
            extra_paths: Vec::new(),
            extra_env: HashMap::new(),
            api_token_vars: defaults.api_token_vars,
        }
    }
}

impl FileConfig {
    fn spawner_config(&self) -> SpawnerConfig {
        let session = &self.session;
        SpawnerConfig {
            image: session.image.clone(),
            registry_server: session.registry_server.clone(),
            registry_username: session.registry_username.clone(),
            registry_password: session.registry_password.clone(),
            storage_account: self.storage.account.clone(),
            storage_key: self.storage.access_key.clone(),
            storage_quota_gb: self.storage.quota_gb,
            storage_access_tier: self.storage.access_tier.clone(),
            location: session.location.clone(),
            subnet_id: session.subnet_id.clone(),
            subnet_name: session.subnet_name.clone(),
            port: session.port,
            cpu_cores: session.cpu_cores,
            memory_gb: session.memory_gb,
            mount_path: session.mount_path.clone(),
            spawn_timeout: Duration::from_secs(session.spawn_timeout_secs),
            poll_interval: Duration::from_secs(session.poll_interval_secs),
            probe_timeout: Duration::from_secs(session.probe_timeout_secs),
            extra_paths: session.extra_paths.clone(),
            extra_env: session.extra_env.clone(),
            api_token_vars: session.api_token_vars.clone(),
        }
    }

    /// Copy with secrets masked, for `config show`.
    fn redacted(&self) -> FileConfig {
        fn mask(value: &str) -> String {
            if value.is_empty() {
                String::new()
            } else {
                "***".to_string()
            }
        }

        let mut redacted = self.clone();
        redacted.provider.api_token = mask(&self.provider.api_token);
        redacted.storage.access_key = mask(&self.storage.access_key);
        redacted.session.registry_password = mask(&self.session.registry_password);
        redacted
    }
}

fn config_file_path(common: &CommonOpts) -> PathBuf {
    match &common.config {
        Some(path) => {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            PathBuf::from(expanded)
        }
        None => dirs::config_dir()
            .map(|dir| dir.join(APP_NAME).join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("strato.toml")),
    }
}

fn load_file_config(common: &CommonOpts) -> Result<FileConfig> {
    let path = config_file_path(common);
    debug!("loading configuration from {}", path.display());

    let built = Config::builder()
        .add_source(
            File::from(path.as_path())
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(APP_NAME).separator("__"))
        .build()
        .context("loading configuration")?;

    built
        .try_deserialize::<FileConfig>()
        .context("parsing configuration")
}

fn build_spawner(file_config: &FileConfig, user: &str, user_id: i64) -> Result<SessionSpawner> {
    if file_config.provider.url.trim().is_empty() {
        bail!("provider.url is not configured");
    }
    if file_config.storage.url.trim().is_empty() {
        bail!("storage.url is not configured");
    }

    let identity = SessionIdentity::new(user, user_id)?;
    let provider = ProviderClient::new(&file_config.provider.url, &file_config.provider.api_token)
        .context("creating provider client")?;
    let shares = ShareClient::new(&file_config.storage.url, &file_config.storage.access_key)
        .context("creating share store client")?;

    let spawner = SessionSpawner::new(
        identity,
        Arc::new(provider),
        Arc::new(shares),
        file_config.spawner_config(),
    )?;
    Ok(spawner)
}

fn parse_env_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --env value {pair:?}, expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("invalid --env value {pair:?}, key cannot be empty");
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

fn handle_config(common: &CommonOpts, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let file_config = load_file_config(common)?;
            let rendered = toml::to_string_pretty(&file_config.redacted())
                .context("rendering configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pairs_parse() {
        let env = parse_env_pairs(&[
            "A=1".to_string(),
            "PATH=/usr/bin:/bin".to_string(),
            "EMPTY=".to_string(),
        ])
        .unwrap();
        assert_eq!(env.get("A"), Some(&"1".to_string()));
        assert_eq!(env.get("PATH"), Some(&"/usr/bin:/bin".to_string()));
        assert_eq!(env.get("EMPTY"), Some(&String::new()));

        assert!(parse_env_pairs(&["NOEQUALS".to_string()]).is_err());
        assert!(parse_env_pairs(&["=value".to_string()]).is_err());
    }

    #[test]
    fn file_config_defaults_match_spawner_defaults() {
        let file_config = FileConfig::default();
        let spawner_config = file_config.spawner_config();
        assert_eq!(spawner_config.port, 80);
        assert_eq!(spawner_config.spawn_timeout, Duration::from_secs(300));
        assert_eq!(spawner_config.poll_interval, Duration::from_secs(10));
        assert_eq!(spawner_config.storage_quota_gb, 2);
    }

    #[test]
    fn file_config_loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[provider]
url = "https://compute.example.com/v1"
api_token = "token"

[storage]
url = "https://store.example.com"
account = "sessionstore"
access_key = "key"
quota_gb = 5

[session]
image = "registry.example.com/session:latest"
registry_server = "registry.example.com"
registry_username = "puller"
registry_password = "secret"
location = "westus2"
subnet_id = "/subnets/sessions"
subnet_name = "sessions"
spawn_timeout_secs = 600
extra_paths = ["/opt/{USERNAME}/bin"]
"#,
        )
        .unwrap();

        let common = CommonOpts {
            config: Some(path),
            quiet: false,
            verbose: 0,
            debug: false,
            trace: false,
            json: false,
        };
        let file_config = load_file_config(&common).unwrap();

        assert_eq!(file_config.provider.url, "https://compute.example.com/v1");
        assert_eq!(file_config.storage.quota_gb, 5);
        let spawner_config = file_config.spawner_config();
        assert_eq!(spawner_config.spawn_timeout, Duration::from_secs(600));
        assert_eq!(spawner_config.extra_paths, vec!["/opt/{USERNAME}/bin"]);
        assert!(spawner_config.validate().is_ok());
    }

    #[test]
    fn redacted_config_masks_secrets() {
        let mut file_config = FileConfig::default();
        file_config.provider.api_token = "secret-token".to_string();
        file_config.session.registry_password = "hunter2".to_string();

        let redacted = file_config.redacted();
        assert_eq!(redacted.provider.api_token, "***");
        assert_eq!(redacted.session.registry_password, "***");
        assert_eq!(redacted.storage.access_key, "");
    }

    #[test]
    fn cli_parses() {
        Cli::command().debug_assert();

        let cli = Cli::parse_from([
            "strato", "start", "--user", "alice", "--user-id", "7", "--env", "A=1", "--", "serve",
            "--port", "80",
        ]);
        match cli.command {
            Command::Start {
                user,
                user_id,
                env,
                command,
            } => {
                assert_eq!(user, "alice");
                assert_eq!(user_id, 7);
                assert_eq!(env, vec!["A=1"]);
                assert_eq!(command, vec!["serve", "--port", "80"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
