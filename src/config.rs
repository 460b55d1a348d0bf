use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

use crate::services::{
    listing_fetcher::FetchConfig,
    pagination::{DEFAULT_MAX_KEYS, Limits, MAX_FILES_PER_BUCKET},
};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub request_timeout: Duration,
    pub page_timeout: Option<Duration>,
    pub init_timeout: Duration,
    pub max_files: u64,
    pub user_agent: String,
    pub clear_on_start: bool,
}

/// What the binary should do once configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Parse { url: String, load_all: bool },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Browse S3-style bucket listings")]
pub struct Args {
    /// Host to bind to (overrides BUCKET_VIEWER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKET_VIEWER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides BUCKET_VIEWER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Deadline in seconds for the first request of a parse
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Deadline in seconds for follow-up page requests (unbounded if unset)
    #[arg(long)]
    pub page_timeout_secs: Option<u64>,

    /// Seconds to wait for the database to become ready
    #[arg(long)]
    pub init_timeout_secs: Option<u64>,

    /// Maximum number of files loaded per bucket
    #[arg(long)]
    pub max_files: Option<u64>,

    /// User-Agent sent when first probing a bucket
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Forget all previously parsed buckets on startup
    #[arg(long)]
    pub clear_on_start: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Parse a single bucket URL, print the result as JSON and exit
    #[arg(long, value_name = "URL")]
    pub parse: Option<String>,

    /// With --parse, also load every remaining page
    #[arg(long, requires = "parse")]
    pub load_all: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, RunMode)> {
        // --- Environment fallback ---
        let env_host = env::var("BUCKET_VIEWER_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let env_port = env_parse("BUCKET_VIEWER_PORT")?.unwrap_or(3000);
        let env_db = env::var("BUCKET_VIEWER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/bucket_viewer.db".into());
        let env_request_timeout = env_parse("BUCKET_VIEWER_REQUEST_TIMEOUT_SECS")?.unwrap_or(30);
        let env_page_timeout = env_parse("BUCKET_VIEWER_PAGE_TIMEOUT_SECS")?;
        let env_init_timeout = env_parse("BUCKET_VIEWER_INIT_TIMEOUT_SECS")?.unwrap_or(10);
        let env_max_files =
            env_parse("BUCKET_VIEWER_MAX_FILES")?.unwrap_or(MAX_FILES_PER_BUCKET);
        let env_user_agent = env::var("BUCKET_VIEWER_USER_AGENT")
            .unwrap_or_else(|_| FetchConfig::default().user_agent);
        let env_clear = env_parse::<bool>("BUCKET_VIEWER_CLEAR_ON_START")?.unwrap_or(false);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            request_timeout: Duration::from_secs(
                args.request_timeout_secs.unwrap_or(env_request_timeout),
            ),
            page_timeout: args
                .page_timeout_secs
                .or(env_page_timeout)
                .map(Duration::from_secs),
            init_timeout: Duration::from_secs(args.init_timeout_secs.unwrap_or(env_init_timeout)),
            max_files: args.max_files.unwrap_or(env_max_files),
            user_agent: args.user_agent.unwrap_or(env_user_agent),
            clear_on_start: args.clear_on_start || env_clear,
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if let Some(url) = args.parse {
            RunMode::Parse {
                url,
                load_all: args.load_all,
            }
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            probe_timeout: self.request_timeout,
            page_timeout: self.page_timeout,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_files: self.max_files,
            default_max_keys: DEFAULT_MAX_KEYS,
        }
    }
}

/// Read and parse an optional environment variable.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_values_win_and_select_mode() {
        let args = Args::try_parse_from([
            "bucket-viewer",
            "--port",
            "8080",
            "--database-url",
            "sqlite::memory:",
            "--max-files",
            "50",
            "--page-timeout-secs",
            "5",
            "--parse",
            "https://example.com/bucket/",
            "--load-all",
        ])
        .unwrap();
        let (cfg, mode) = AppConfig::from_args(args).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.limits().max_files, 50);
        assert_eq!(cfg.fetch_config().page_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            mode,
            RunMode::Parse {
                url: "https://example.com/bucket/".into(),
                load_all: true
            }
        );
    }

    #[test]
    fn load_all_requires_parse() {
        assert!(Args::try_parse_from(["bucket-viewer", "--load-all"]).is_err());
    }

    #[test]
    fn migrate_flag_selects_migrate_mode() {
        let args = Args::try_parse_from(["bucket-viewer", "--migrate"]).unwrap();
        let (_, mode) = AppConfig::from_args(args).unwrap();
        assert_eq!(mode, RunMode::Migrate);
    }
}
