use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ColorChoice, Command,
};
use url::Url;

use crate::verification::{
    lockout::{DEFAULT_LOCKOUT_BASE_SECONDS, DEFAULT_LOCKOUT_MAX_SECONDS, DEFAULT_LOCKOUT_THRESHOLD},
    session::{DEFAULT_FACIAL_FALLBACK_AFTER, DEFAULT_OTP_TTL_SECONDS, DEFAULT_SESSION_TTL_SECONDS},
};
use crate::voterpass::registry::DEFAULT_RETENTION_SECONDS;

pub const ARG_VERBOSITY: &str = "verbosity";

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn validator_origin() -> ValueParser {
    ValueParser::from(move |origin: &str| -> std::result::Result<Url, String> {
        let url = Url::parse(origin).map_err(|e| format!("invalid origin: {e}"))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(format!("unsupported origin scheme: {scheme}")),
        }
    })
}

fn seconds(name: &'static str, env: &'static str, help: &'static str, default: u64) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .default_value(default.to_string())
        .value_parser(clap::value_parser!(u64).range(1..))
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("voterpass")
        .about("Voter verification sessions")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("VOTERPASS_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(seconds(
            "session-ttl",
            "VOTERPASS_SESSION_TTL",
            "Seconds a verification session stays open",
            DEFAULT_SESSION_TTL_SECONDS,
        ))
        .arg(seconds(
            "otp-ttl",
            "VOTERPASS_OTP_TTL",
            "Seconds an alternative one-time code stays valid",
            DEFAULT_OTP_TTL_SECONDS,
        ))
        .arg(
            Arg::new("lockout-threshold")
                .long("lockout-threshold")
                .help("Failed attempts before the first lockout")
                .env("VOTERPASS_LOCKOUT_THRESHOLD")
                .default_value(DEFAULT_LOCKOUT_THRESHOLD.to_string())
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(seconds(
            "lockout-base",
            "VOTERPASS_LOCKOUT_BASE",
            "Seconds of the first lockout, doubled on every further failure",
            DEFAULT_LOCKOUT_BASE_SECONDS,
        ))
        .arg(seconds(
            "lockout-max",
            "VOTERPASS_LOCKOUT_MAX",
            "Upper bound for a single lockout in seconds",
            DEFAULT_LOCKOUT_MAX_SECONDS,
        ))
        .arg(
            Arg::new("facial-fallback-after")
                .long("facial-fallback-after")
                .help("Failed facial captures before the alternative method is offered")
                .env("VOTERPASS_FACIAL_FALLBACK_AFTER")
                .default_value(DEFAULT_FACIAL_FALLBACK_AFTER.to_string())
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(seconds(
            "retention",
            "VOTERPASS_RETENTION",
            "Seconds a finished session stays readable before it is dropped",
            DEFAULT_RETENTION_SECONDS,
        ))
        .arg(
            Arg::new("cors-origin")
                .long("cors-origin")
                .help("Allowed CORS origin, example: https://vote.example.in (default: any)")
                .env("VOTERPASS_CORS_ORIGIN")
                .value_parser(validator_origin()),
        )
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("VOTERPASS_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
