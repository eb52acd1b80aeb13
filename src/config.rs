use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::inject::{CommandInjector, DisabledInjector, HttpInjector, InputInjector};
use crate::relay::RelaySettings;

pub const API_KEY_ENV: &str = "MOBILE_RELAY_API_KEY";

#[derive(Debug, Parser, Clone)]
#[command(name = "agent-mobile-relay")]
#[command(about = "Relays local coding-agent activity to a mobile client over WebSocket")]
pub struct Config {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,

    /// Required on every route but /health when set. Falls back to MOBILE_RELAY_API_KEY.
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Transcript poll interval.
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Activity lines kept per agent for replay to new clients.
    #[arg(long, default_value_t = 50)]
    pub activity_history: usize,

    /// Chat messages kept per agent for replay to new clients.
    #[arg(long, default_value_t = 200)]
    pub chat_history: usize,

    /// Program used to type into agent terminals, e.g. "python3 paste.py".
    /// Invoked as `<cmd> inject <agentId>` (text on stdin) or `<cmd> interrupt <agentId>`.
    #[arg(long, conflicts_with = "inject_url")]
    pub inject_command: Option<String>,

    /// Base URL of a local automation helper exposing /inject and /interrupt.
    #[arg(long)]
    pub inject_url: Option<String>,

    #[arg(long, default_value_t = 10)]
    pub inject_timeout_secs: u64,
}

impl Config {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn configured_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            activity_history: self.activity_history,
            chat_history: self.chat_history,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            inject_timeout: Duration::from_secs(self.inject_timeout_secs.max(1)),
        }
    }

    pub fn build_injector(&self) -> Result<Arc<dyn InputInjector>> {
        if let Some(command_line) = self.inject_command.as_deref() {
            let injector = CommandInjector::from_command_line(command_line)
                .with_context(|| format!("could not parse --inject-command {command_line:?}"))?;
            return Ok(Arc::new(injector));
        }
        if let Some(url) = self.inject_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            return Ok(Arc::new(HttpInjector::new(url)));
        }
        Ok(Arc::new(DisabledInjector))
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use clap::Parser;

    #[test]
    fn defaults_match() {
        let cfg = Config::parse_from(["agent-mobile-relay"]);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8787);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.poll_interval_ms, 1000);
        assert_eq!(cfg.activity_history, 50);
        assert_eq!(cfg.chat_history, 200);
        assert_eq!(cfg.inject_timeout_secs, 10);
        assert!(cfg.inject_command.is_none());
        assert!(cfg.inject_url.is_none());
    }

    #[test]
    fn listen_addr_combines_host_and_port() {
        let cfg = Config::parse_from(["agent-mobile-relay", "--host", "0.0.0.0", "--port", "9000"]);
        assert_eq!(cfg.listen_addr().unwrap().to_string(), "0.0.0.0:9000");

        let cfg = Config::parse_from(["agent-mobile-relay", "--host", "not a host"]);
        assert!(cfg.listen_addr().is_err());
    }

    #[test]
    fn explicit_api_key_is_trimmed() {
        let cfg = Config::parse_from(["agent-mobile-relay", "--api-key", "  secret  "]);
        assert_eq!(cfg.configured_api_key().as_deref(), Some("secret"));
    }

    #[test]
    fn inject_command_and_url_conflict() {
        let result = Config::try_parse_from([
            "agent-mobile-relay",
            "--inject-command",
            "paste.sh",
            "--inject-url",
            "http://127.0.0.1:9999",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn unparseable_inject_command_is_an_error() {
        let cfg = Config::parse_from(["agent-mobile-relay", "--inject-command", "'unterminated"]);
        assert!(cfg.build_injector().is_err());
    }

    #[test]
    fn settings_follow_flags() {
        let cfg = Config::parse_from([
            "agent-mobile-relay",
            "--poll-interval-ms",
            "250",
            "--chat-history",
            "10",
        ]);
        let settings = cfg.relay_settings();
        assert_eq!(settings.poll_interval.as_millis(), 250);
        assert_eq!(settings.chat_history, 10);
        assert_eq!(settings.activity_history, 50);
    }
}
