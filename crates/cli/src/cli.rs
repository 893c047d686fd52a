use clap::Parser;
use hubfetch_core::{
    DEFAULT_ENDPOINT, DEFAULT_MAX_PARALLEL, DEFAULT_REVISION, DownloadConfig, RepoType,
};
use std::path::PathBuf;
use std::time::Duration;

use crate::tracing::{LogLevel, TracingFormat};

/// Repository fetched when none is named.
pub const DEFAULT_REPO: &str = "openai-community/gpt2";

#[derive(Parser, Debug)]
#[command(name = "hubfetch")]
#[command(about = "Download a model hub repository into the local hub cache")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(help = "Repository id, e.g. openai-community/gpt2", default_value = DEFAULT_REPO)]
    pub repo_id: String,

    #[arg(help = "Branch, tag or commit to download", default_value = DEFAULT_REVISION)]
    pub revision: String,

    #[arg(help = "Store the repository in this directory instead of the hub cache")]
    pub path: Option<PathBuf>,

    #[arg(long, help = "Kind of repository", default_value = "model")]
    pub repo_type: RepoType,

    #[arg(
        long = "ignore",
        value_name = "REGEX",
        help = "Skip files whose path matches (repeatable, replaces the defaults)"
    )]
    pub ignore: Vec<String>,

    #[arg(long, help = "Download every file", conflicts_with = "ignore")]
    pub no_ignore: bool,

    #[arg(
        long,
        help = "Files downloaded at once (0 for no limit)",
        default_value_t = DEFAULT_MAX_PARALLEL
    )]
    pub max_parallel: usize,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Request timeout; body downloads time out only when idle this long",
        default_value_t = 30
    )]
    pub timeout: u64,

    #[arg(long, env = "HF_TOKEN", hide_env_values = true, help = "Access token")]
    pub token: Option<String>,

    #[arg(long, env = "HF_ENDPOINT", help = "Hub endpoint", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, env = "HF_HUB_CACHE", help = "Hub cache directory")]
    pub cache_dir: Option<PathBuf>,

    #[arg(
        short = 'l',
        long,
        help = "Set logging level",
        default_value = "info",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(long, help = "Output logs in JSON format")]
    pub json: bool,
}

impl Cli {
    /// Log formatter selected by the flags.
    pub const fn tracing_format(&self) -> TracingFormat {
        if self.json {
            TracingFormat::Json
        } else {
            TracingFormat::Compact
        }
    }

    /// Build the engine configuration from the parsed flags.
    pub fn download_config(&self) -> DownloadConfig {
        let mut config = DownloadConfig::new()
            .with_endpoint(self.endpoint.clone())
            .with_token(self.token.clone())
            .with_local_dir(self.path.clone())
            .with_repo_type(self.repo_type)
            .with_max_parallel(self.max_parallel)
            .with_timeout(Duration::from_secs(self.timeout));

        if let Some(cache_dir) = &self.cache_dir {
            config = config.with_hub_cache(cache_dir);
        }
        if self.no_ignore {
            config = config.with_ignore_patterns(Vec::<String>::new());
        } else if !self.ignore.is_empty() {
            config = config.with_ignore_patterns(self.ignore.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubfetch_core::DEFAULT_IGNORE_PATTERNS;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_default_values() {
        let cli = parse(&["hubfetch"]);

        assert_eq!(cli.repo_id, "openai-community/gpt2");
        assert_eq!(cli.revision, "main");
        assert!(cli.path.is_none());
        assert_eq!(cli.repo_type, RepoType::Model);
        assert!(matches!(cli.level, LogLevel::Info));
        assert!(!cli.json);
        assert_eq!(cli.max_parallel, DEFAULT_MAX_PARALLEL);
    }

    #[test]
    fn test_progressive_positionals() {
        let cli = parse(&["hubfetch", "org/tiny-model"]);
        assert_eq!(cli.repo_id, "org/tiny-model");
        assert_eq!(cli.revision, "main");

        let cli = parse(&["hubfetch", "org/tiny-model", "v1.0"]);
        assert_eq!(cli.revision, "v1.0");
        assert!(cli.path.is_none());

        let cli = parse(&["hubfetch", "org/tiny-model", "v1.0", "/tmp/models"]);
        assert_eq!(cli.path, Some(PathBuf::from("/tmp/models")));
    }

    #[test]
    fn test_cli_log_level_parsing() {
        let cli = parse(&["hubfetch", "--level", "trace"]);
        assert!(matches!(cli.level, LogLevel::Trace));

        let cli = parse(&["hubfetch", "-l", "error"]);
        assert!(matches!(cli.level, LogLevel::Error));

        assert!(Cli::try_parse_from(["hubfetch", "--level", "invalid"]).is_err());
    }

    #[test]
    fn test_cli_json_flag() {
        let cli = parse(&["hubfetch", "--json"]);
        assert!(matches!(cli.tracing_format(), TracingFormat::Json));

        let cli = parse(&["hubfetch"]);
        assert!(matches!(cli.tracing_format(), TracingFormat::Compact));
    }

    #[test]
    fn test_repo_type_option() {
        let cli = parse(&["hubfetch", "--repo-type", "dataset", "org/ds"]);
        assert_eq!(cli.repo_type, RepoType::Dataset);
        assert!(Cli::try_parse_from(["hubfetch", "--repo-type", "notebook"]).is_err());
    }

    #[test]
    fn test_default_ignore_patterns_kept() {
        let config = parse(&["hubfetch"]).download_config();
        assert_eq!(config.ignore_patterns, DEFAULT_IGNORE_PATTERNS);
    }

    #[test]
    fn test_ignore_replaces_defaults() {
        let config =
            parse(&["hubfetch", "--ignore", r"\.bin$", "--ignore", "^onnx/"]).download_config();
        assert_eq!(config.ignore_patterns, vec![r"\.bin$", "^onnx/"]);
    }

    #[test]
    fn test_no_ignore() {
        let config = parse(&["hubfetch", "--no-ignore"]).download_config();
        assert!(config.ignore_patterns.is_empty());

        assert!(Cli::try_parse_from(["hubfetch", "--no-ignore", "--ignore", "x"]).is_err());
    }

    #[test]
    fn test_download_config_from_flags() {
        let config = parse(&[
            "hubfetch",
            "org/tiny-model",
            "main",
            "/tmp/local",
            "--endpoint",
            "http://127.0.0.1:9000",
            "--cache-dir",
            "/tmp/hub",
            "--max-parallel",
            "2",
            "--timeout",
            "5",
        ])
        .download_config();

        assert_eq!(config.endpoint, "http://127.0.0.1:9000");
        assert_eq!(config.hub_cache, Some(PathBuf::from("/tmp/hub")));
        assert_eq!(config.local_dir, Some(PathBuf::from("/tmp/local")));
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(
            config.storage_root("org/tiny-model").unwrap(),
            PathBuf::from("/tmp/local")
        );
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let config = parse(&["hubfetch", "--token", ""]).download_config();
        assert!(config.token.is_none());
    }

    #[test]
    fn test_help_flag() {
        let err = Cli::try_parse_from(["hubfetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
