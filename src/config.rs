use clap::Parser;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::error::{DnsError, Result};

#[derive(Parser, Debug)]
#[command(name = "dns-forwarder")]
#[command(version)]
#[command(about = "Forwarding DNS server that splits multi-question queries")]
pub struct Cli {
    /// Upstream resolver as <host>:<port>
    #[arg(long, env = "RESOLVER", value_name = "HOST:PORT")]
    pub resolver: Option<String>,

    /// Listen address
    #[arg(long, env = "HOST_NAME", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 2053)]
    pub port: u16,

    /// Upstream deadline in milliseconds
    #[arg(long = "timeout-ms", env = "FORWARD_TIMEOUT_MS", default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Cache upstream answers in memory
    #[arg(long, env = "DNS_CACHE")]
    pub cache: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub resolver: SocketAddr,
    pub timeout: Duration,
    pub cache: bool,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let resolver = cli.resolver.as_deref().ok_or_else(|| {
            DnsError::Configuration(
                "Resolver not provided. Use --resolver <ip>:<port> or set RESOLVER".to_string(),
            )
        })?;

        Ok(Config {
            listen: resolve_addr(&cli.host, cli.port)?,
            resolver: parse_resolver(resolver)?,
            timeout: Duration::from_millis(cli.timeout_ms),
            cache: cli.cache,
        })
    }
}

fn parse_resolver(value: &str) -> Result<SocketAddr> {
    let invalid = || {
        DnsError::Configuration(format!(
            "Invalid resolver format: {value}. Expected format: <ip>:<port>"
        ))
    };

    let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;

    resolve_addr(host, port)
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| DnsError::Configuration(format!("Cannot resolve {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| DnsError::Configuration(format!("No address for {host}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> Result<Config> {
        let cli = Cli::try_parse_from(std::iter::once("dns-forwarder").chain(args.iter().copied()))
            .unwrap();
        Config::from_cli(&cli)
    }

    #[test]
    fn test_resolver_flag() {
        let config = config(&["--resolver", "127.0.0.1:5353"]).unwrap();
        assert_eq!(config.resolver, "127.0.0.1:5353".parse().unwrap());
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert!(!config.cache);
    }

    #[test]
    fn test_ipv6_resolver() {
        let config = config(&["--resolver", "[::1]:53"]).unwrap();
        assert_eq!(config.resolver, "[::1]:53".parse().unwrap());
    }

    #[test]
    fn test_listen_overrides() {
        let config = config(&[
            "--resolver",
            "127.0.0.1:53",
            "--host",
            "127.0.0.1",
            "--port",
            "5300",
            "--timeout-ms",
            "250",
            "--cache",
        ])
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:5300".parse().unwrap());
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert!(config.cache);
    }

    #[test]
    fn test_malformed_resolver() {
        for bad in ["127.0.0.1", "127.0.0.1:", ":53", "127.0.0.1:dns", "127.0.0.1:70000"] {
            let result = config(&["--resolver", bad]);
            assert!(
                matches!(result, Err(DnsError::Configuration(_))),
                "accepted {bad}"
            );
        }
    }
}
