//! TOML configuration file parsing

use super::*;
use crate::config::cli::RunArgs;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(args: &RunArgs, mut config: Config) -> Config {
    if let Some(workers) = args.workers {
        config.run.workers = Some(workers);
    }
    if let Some(transport) = args.transport {
        config.run.transport = transport;
    }
    if args.allow_missing {
        config.run.missing_result = MissingResultPolicy::Zero;
    }
    if let Some(secs) = args.timeout_secs {
        config.run.timeout_secs = Some(secs);
    }

    if args.json {
        config.output.format = OutputFormat::Json;
    }
    if args.per_worker {
        config.output.per_worker = true;
    }

    config
}

/// Load the optional config file named on the command line and apply CLI overrides
pub fn build_config(args: &RunArgs) -> Result<Config> {
    let base = match &args.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    Ok(merge_cli_with_config(args, base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_toml_basic() {
        let toml = r#"
            [run]
            workers = 4
            transport = "pipe"
            missing_result = "zero"
            timeout_secs = 30

            [output]
            format = "json"
            per_worker = true
        "#;

        let config = parse_toml_string(toml).unwrap();
        assert_eq!(config.run.workers, Some(4));
        assert_eq!(config.run.transport, TransportKind::Pipe);
        assert_eq!(config.run.missing_result, MissingResultPolicy::Zero);
        assert_eq!(config.run.timeout_secs, Some(30));
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.per_worker);
    }

    #[test]
    fn test_parse_toml_empty_uses_defaults() {
        assert_eq!(parse_toml_string("").unwrap(), Config::default());

        let config = parse_toml_string("[run]\ntransport = \"shm\"\n").unwrap();
        assert_eq!(config.run.transport, TransportKind::SharedMemory);
        assert_eq!(config.run.workers, None);
    }

    #[test]
    fn test_parse_toml_rejects_bad_values() {
        assert!(parse_toml_string("[run]\ntransport = \"carrier-pigeon\"\n").is_err());
        assert!(parse_toml_string("[run]\nmissing_result = \"ignore\"\n").is_err());
        assert!(parse_toml_string("[run]\nworkers = -2\n").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file_config = parse_toml_string(
            "[run]\nworkers = 8\ntransport = \"pipe\"\n[output]\nformat = \"text\"\n",
        )
        .unwrap();

        let args = RunArgs {
            workers: Some(2),
            json: true,
            allow_missing: true,
            ..RunArgs::default()
        };
        let config = merge_cli_with_config(&args, file_config);

        assert_eq!(config.run.workers, Some(2));
        // Not given on the command line, so the file wins
        assert_eq!(config.run.transport, TransportKind::Pipe);
        assert_eq!(config.run.missing_result, MissingResultPolicy::Zero);
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_build_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[run]\nworkers = 3\n[output]\nper_worker = true").unwrap();

        let args = RunArgs {
            config: Some(file.path().to_path_buf()),
            transport: Some(TransportKind::Pipe),
            ..RunArgs::default()
        };
        let config = build_config(&args).unwrap();
        assert_eq!(config.run.workers, Some(3));
        assert_eq!(config.run.transport, TransportKind::Pipe);
        assert!(config.output.per_worker);
    }

    #[test]
    fn test_build_config_missing_file() {
        let args = RunArgs {
            config: Some("/nonexistent/ipcsum.toml".into()),
            ..RunArgs::default()
        };
        let err = build_config(&args).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
