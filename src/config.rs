//! Command-line / environment configuration.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct Config {
    #[arg(long, env = "REQSCOPE_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    #[arg(long, env = "REQSCOPE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Artificial delay of `PUT /items/{item_id}`, in milliseconds.
    #[arg(long, env = "REQSCOPE_ITEM_DELAY_MS", default_value_t = 2000)]
    pub item_delay_ms: u64,

    /// `*` echoes the caller's origin.
    #[arg(long, env = "REQSCOPE_CORS_ALLOW_ORIGIN", default_value = "*")]
    pub cors_allow_origin: String,
}

impl Config {
    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    /// Installs the global subscriber. Filter comes from `RUST_LOG`,
    /// defaulting to `info`.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        match self.log_format {
            LogFormat::Text => builder.init(),
            LogFormat::Json => builder.json().init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::try_parse_from(["reqscope"]).unwrap();
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(cfg.cors_allow_origin, "*");
        assert_eq!(cfg.item_delay(), Duration::from_secs(2));
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "reqscope",
            "--listen-addr", "127.0.0.1:9000",
            "--log-format", "json",
            "--item-delay-ms", "0",
        ])
        .unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.item_delay(), Duration::ZERO);
    }
}
