use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use url::Url;

/// # Errors
/// Returns an error if a required argument is missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let seconds = |name: &str| -> Result<u64> {
        matches
            .get_one::<u64>(name)
            .copied()
            .with_context(|| format!("missing required argument: --{name}"))
    };

    let count = |name: &str| -> Result<u32> {
        matches
            .get_one::<u32>(name)
            .copied()
            .with_context(|| format!("missing required argument: --{name}"))
    };

    Ok(Action::Server(Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        session_ttl: seconds("session-ttl")?,
        otp_ttl: seconds("otp-ttl")?,
        lockout_threshold: count("lockout-threshold")?,
        lockout_base: seconds("lockout-base")?,
        lockout_max: seconds("lockout-max")?,
        facial_fallback_after: count("facial-fallback-after")?,
        retention: seconds("retention")?,
        cors_origin: matches.get_one::<Url>("cors-origin").cloned(),
    }))
}
