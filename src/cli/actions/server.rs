use crate::{
    cli::telemetry,
    verification::{LockoutPolicy, LogDelivery, SessionConfig},
    voterpass::{self, registry::SessionRegistry},
};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub session_ttl: u64,
    pub otp_ttl: u64,
    pub lockout_threshold: u32,
    pub lockout_base: u64,
    pub lockout_max: u64,
    pub facial_fallback_after: u32,
    pub retention: u64,
    pub cors_origin: Option<Url>,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .with_session_ttl_seconds(self.session_ttl)
            .with_otp_ttl_seconds(self.otp_ttl)
            .with_facial_fallback_after(self.facial_fallback_after)
            .with_lockout(LockoutPolicy::new(
                self.lockout_threshold,
                self.lockout_base,
                self.lockout_max,
            ))
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.session_config();
    debug!(?config, "session configuration");

    let registry = Arc::new(
        SessionRegistry::new(config, Arc::new(LogDelivery)).with_retention_seconds(args.retention),
    );

    info!(
        port = args.port,
        cors_origin = args.cors_origin.as_ref().map(Url::as_str),
        "starting voterpass"
    );

    let result = voterpass::new(args.port, registry, args.cors_origin).await;

    telemetry::shutdown_tracer();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_session_config_from_args() {
        let args = Args {
            port: 8080,
            session_ttl: 900,
            otp_ttl: 60,
            lockout_threshold: 3,
            lockout_base: 10,
            lockout_max: 100,
            facial_fallback_after: 4,
            retention: 30,
            cors_origin: None,
        };

        let config = args.session_config();
        assert_eq!(config.session_ttl_seconds(), 900);
        assert_eq!(config.otp_ttl_seconds(), 60);
        assert_eq!(config.facial_fallback_after(), 4);
        assert_eq!(config.lockout().threshold(), 3);
        assert_eq!(config.lockout().lockout_seconds(3), 10);
        assert_eq!(config.lockout().lockout_seconds(10), 100);
    }
}
