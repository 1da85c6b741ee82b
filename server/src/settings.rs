//! Configuration loading: command line, file, environment.

use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Logging level, overridable with `CORVID_LOG_LEVEL`.
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(flatten)]
    pub node: corvid_node::config::Config,
}

fn options() -> getopts::Options {
    let mut opts = getopts::Options::new();
    opts.optflag("h", "help", "print this help menu")
        .optflag("v", "version", "print the version information")
        .optopt("c", "config", "use a custom configuration file", "FILE");
    opts
}

pub fn init() -> Option<(Settings, String)> {
    let opts = options();
    let args: Vec<String> = std::env::args().collect();
    let flags = opts
        .parse(&args[1..])
        .expect("Failed to parse command line args");
    if flags.opt_present("h") {
        let brief = format!(
            "{} {} - {}\n\nUsage: {} [options]",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION"),
            args[0]
        );
        print!("{}", opts.usage(&brief));
        return None;
    }
    if flags.opt_present("v") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return None;
    }

    let mut b = ::config::Config::builder();

    let config_source: String;
    if let Some(source) = flags.opt_str("config") {
        config_source = format!("Using configuration file '{source}' specified on command line");
        b = b.add_source(::config::File::with_name(&source));
    } else if let Ok(source) = std::env::var("CORVID_CONFIG_FILE") {
        config_source = format!(
            "Using configuration file '{source}' specified by CORVID_CONFIG_FILE environment variable"
        );
        b = b.add_source(::config::File::with_name(&source));
    } else {
        let path = std::path::Path::new("/etc/corvid/corvid.toml");
        config_source = format!("Using configuration file '{}'", path.display());
        b = b.add_source(::config::File::from(path).required(false));
    }

    // Environment variables override the file
    b = b.add_source(::config::Environment::with_prefix("CORVID"));

    let settings: Settings = b
        .build()
        .expect("Failed to read configuration")
        .try_deserialize()
        .expect("Failed to parse configuration");

    Some((settings, config_source))
}

/// Resolves the log level: environment beats configuration, default ERROR.
pub fn log_level(settings: &Settings) -> tracing::Level {
    std::env::var("CORVID_LOG_LEVEL")
        .ok()
        .or_else(|| settings.log_level.clone())
        .and_then(|s| tracing::Level::from_str(&s).ok())
        .unwrap_or(tracing::Level::ERROR)
}
