use clap::Parser;
use error::*;
use std::time::Duration;

/// Top-level CLI, matching the `compute-gateway serve [flags]` contract.
#[derive(Parser, Debug)]
#[clap(name = "compute-gateway")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Parser, Debug)]
pub enum Command {
    /// Runs the gateway plane: GFE, HP, WP, PM, CM, AC.
    Serve(ServeArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    #[clap(long, default_value = ":8443")]
    pub listen: String,

    #[clap(long, env = "PREVIEW_DOMAIN")]
    pub preview_domain: String,

    #[clap(long, env = "DEFAULT_PRESET_ID", default_value = "default-development")]
    pub default_preset: String,

    #[clap(long, default_value = "true")]
    pub enable_teardown: bool,

    #[clap(long, default_value = "60s", parse(try_from_str = parse_duration))]
    pub teardown_delay: Duration,

    #[clap(long, env = "JWT_ISSUER", default_value = "compute-gateway")]
    pub issuer: String,
}

/// Parses durations of the form `60s`, `200ms`, `5m` used throughout the CLI and config.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let (number, unit) = raw
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| raw.split_at(idx))
        .ok_or_else(|| format!("duration '{}' has no unit suffix", raw))?;
    let number: u64 = number
        .parse()
        .map_err(|_| format!("duration '{}' has a non-numeric magnitude", raw))?;
    match unit {
        "ms" => Ok(Duration::from_millis(number)),
        "s" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number * 60)),
        other => Err(format!("unrecognized duration unit '{}'", other)),
    }
}

/// Process-wide configuration resolved from the environment, independent of the `serve`
/// subcommand's own flags. Fields here are things the CLI cannot reasonably expose (secrets)
/// or that have no sensible default (the database DSN).
pub struct Env {
    pub jwt_secret: String,
    pub db_dsn: String,
    pub cluster_kubeconfig: Option<String>,
}

#[derive(Error, GatewayError, Kind, HttpCode, Debug)]
#[code(Status::InternalServerError)]
pub enum ConfigError {
    #[error("required environment variable '{0}' is not set")]
    MissingVar(&'static str),
}

impl Env {
    pub fn from_environment() -> std::result::Result<Self, ConfigError> {
        Ok(Env {
            jwt_secret: std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingVar("JWT_SECRET"))?,
            db_dsn: std::env::var("DB_DSN").map_err(|_| ConfigError::MissingVar("DB_DSN"))?,
            cluster_kubeconfig: std::env::var("CLUSTER_KUBECONFIG").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_and_milliseconds() {
        assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("200ms").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn rejects_unitless_or_malformed_durations() {
        assert!(parse_duration("60").is_err());
        assert!(parse_duration("abc").is_err());
    }
}
