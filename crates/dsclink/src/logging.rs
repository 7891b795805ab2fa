use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment variable holding full filter directives. When set it wins
/// over `--log-level`.
pub const LOG_ENV: &str = "DSCLINK_LOG";

const LINK_CRATES: [&str; 4] = ["dsclink", "dsclink_session", "dsclink_frame", "dsclink_transport"];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// How much of the link conversation reaches stderr.
///
/// `debug` shows every frame and control byte, `trace` adds individual
/// line bytes and escape handling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn name(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Filter directives for the link crates. Everything else (clap, ctrlc)
    /// stays at `warn` so `trace` does not drown the protocol log.
    pub fn directives(self) -> String {
        let mut out = String::from("warn");
        for krate in LINK_CRATES {
            out.push(',');
            out.push_str(krate);
            out.push('=');
            out.push_str(self.name());
        }
        out
    }
}

fn build_filter(level: LogLevel, env_override: Option<&str>) -> EnvFilter {
    if let Some(directives) = env_override.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("warning: ignoring {LOG_ENV}: {err}"),
        }
    }
    EnvFilter::new(level.directives())
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env_override = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, env_override.as_deref()))
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
