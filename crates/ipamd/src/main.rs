// # ipamd - IPAM Daemon
//
// Thin host process for the IPAM coordinator. All allocation logic lives in
// ipam-core; this binary only:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Builds the family allocators through the registry
// 4. Reports pool status until it is asked to stop
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Pools
// - `IPAM_IPV4_CIDR`: IPv4 range to allocate from (unset disables IPv4)
// - `IPAM_IPV6_CIDR`: IPv6 range to allocate from (unset disables IPv6)
// - `IPAM_BLACKLIST`: Comma-separated addresses that are never handed out
//
// ### Leases
// - `IPAM_EXPIRATION_TIMEOUT_MS`: Default lease length
//
// ### Daemon
// - `IPAM_STATUS_INTERVAL_SECS`: How often pool status is logged
// - `IPAM_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export IPAM_IPV4_CIDR=10.20.0.0/24
// export IPAM_IPV6_CIDR=fd00:20::/112
// export IPAM_BLACKLIST=10.20.0.1,fd00:20::1
//
// ipamd
// ```

use anyhow::{Context, Result};
use ipam_core::{AllocatorConfig, AllocatorRegistry, ExpirationConfig, Ipam, IpamConfig};
use ipnet::IpNet;
use std::env;
use std::net::IpAddr;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum IpamExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<IpamExitCode> for ExitCode {
    fn from(code: IpamExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    ipv4_cidr: Option<IpNet>,
    ipv6_cidr: Option<IpNet>,
    blacklist: Vec<IpAddr>,
    expiration_timeout_ms: Option<u64>,
    status_interval_secs: u64,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            ipv4_cidr: parse_var("IPAM_IPV4_CIDR")?,
            ipv6_cidr: parse_var("IPAM_IPV6_CIDR")?,
            blacklist: env::var("IPAM_BLACKLIST")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<IpAddr>()
                        .with_context(|| format!("IPAM_BLACKLIST entry '{}' is not an IP", s))
                })
                .collect::<Result<_>>()?,
            expiration_timeout_ms: parse_var("IPAM_EXPIRATION_TIMEOUT_MS")?,
            status_interval_secs: parse_var("IPAM_STATUS_INTERVAL_SECS")?.unwrap_or(60),
            log_level: env::var("IPAM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.ipv4_cidr.is_none() && self.ipv6_cidr.is_none() {
            anyhow::bail!(
                "At least one of IPAM_IPV4_CIDR or IPAM_IPV6_CIDR is required. \
                Set it via: export IPAM_IPV4_CIDR=10.20.0.0/24"
            );
        }

        if let Some(IpNet::V6(cidr)) = self.ipv4_cidr {
            anyhow::bail!("IPAM_IPV4_CIDR must be an IPv4 range. Got: {}", cidr);
        }

        if let Some(IpNet::V4(cidr)) = self.ipv6_cidr {
            anyhow::bail!("IPAM_IPV6_CIDR must be an IPv6 range. Got: {}", cidr);
        }

        if self.expiration_timeout_ms == Some(0) {
            anyhow::bail!("IPAM_EXPIRATION_TIMEOUT_MS must be greater than 0");
        }

        if !(1..=3600).contains(&self.status_interval_secs) {
            anyhow::bail!(
                "IPAM_STATUS_INTERVAL_SECS must be between 1 and 3600 seconds. Got: {}",
                self.status_interval_secs
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "IPAM_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Translate into the library configuration
    fn ipam_config(&self) -> IpamConfig {
        let mut config = IpamConfig::new().with_blacklist(self.blacklist.iter().copied());

        if let Some(cidr) = self.ipv4_cidr {
            config = config.with_ipv4(AllocatorConfig::range(cidr));
        }
        if let Some(cidr) = self.ipv6_cidr {
            config = config.with_ipv6(AllocatorConfig::range(cidr));
        }
        if let Some(default_timeout_ms) = self.expiration_timeout_ms {
            config.expiration = ExpirationConfig { default_timeout_ms };
        }

        config
    }
}

/// Parse an optional environment variable
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} '{}' is invalid: {}", name, value, e)),
        _ => Ok(None),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return IpamExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return IpamExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IpamExitCode::ConfigError.into();
    }

    info!("Starting ipamd daemon");

    let ipam = match Ipam::from_config(&config.ipam_config(), &AllocatorRegistry::new()) {
        Ok(ipam) => ipam,
        Err(e) => {
            error!("Failed to build coordinator: {}", e);
            return IpamExitCode::ConfigError.into();
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IpamExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(ipam, &config).await {
            error!("Daemon error: {}", e);
            IpamExitCode::RuntimeError
        } else {
            IpamExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(ipam: Ipam, config: &Config) -> Result<()> {
    if let Some(cidr) = config.ipv4_cidr {
        info!("IPv4 pool: {}", cidr);
    }
    if let Some(cidr) = config.ipv6_cidr {
        info!("IPv6 pool: {}", cidr);
    }
    info!("Blacklisted addresses: {}", config.blacklist.len());
    info!("Default lease length: {:?}", ipam.default_expiration());

    let mut status = tokio::time::interval(Duration::from_secs(config.status_interval_secs));
    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    info!("Daemon initialized successfully");

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                let signal = signal?;
                info!("Received shutdown signal: {}", signal);
                break;
            }
            _ = status.tick() => {
                let dump = ipam.dump().await;
                info!(status = %dump.status, "Pool status");
            }
        }
    }

    info!("Shutting down daemon");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
