mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use dsclink_session::SpeedPreference;

use crate::cmd::{Command, Context};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "dsclink", version, about = "DS-7 / MX-700 camera link tool")]
struct Cli {
    /// Serial device the camera is attached to.
    #[arg(
        long,
        short = 'D',
        env = "DSCLINK_DEVICE",
        default_value = "/dev/fujifilm",
        global = true
    )]
    device: PathBuf,

    /// Link speed: `auto` or one of 115200, 57600, 38400, 19200, 9600.
    #[arg(
        long,
        short = 'B',
        env = "DSCLINK_SPEED",
        default_value = "auto",
        global = true
    )]
    speed: SpeedPreference,

    /// Assume the minimal DS-7 command set instead of querying it.
    #[arg(long, short = '7', global = true)]
    ds7: bool,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Log level for the link crates (stderr). DSCLINK_LOG directives override it.
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);
    let cancel = match cmd::install_interrupt_handler() {
        Ok(cancel) => cancel,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    };

    let ctx = Context {
        device: cli.device,
        speed: cli.speed,
        ds7: cli.ds7,
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
        cancel,
    };
    let result = cmd::run(cli.command, &ctx);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::get::Selector;

    #[test]
    fn parses_get_with_selectors() {
        let cli = Cli::try_parse_from(["dsclink", "get", "last", "3-5", "--force"])
            .expect("get args should parse");
        match cli.command {
            Command::Get(args) => {
                assert_eq!(args.selectors, vec![Selector::Last, Selector::Range(3, 5)]);
                assert!(args.force);
                assert!(!args.by_number);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "dsclink",
            "info",
            "--device",
            "/dev/ttyS1",
            "--speed",
            "38400",
        ])
        .expect("info args should parse");
        assert_eq!(cli.device, PathBuf::from("/dev/ttyS1"));
        assert_eq!(cli.speed, SpeedPreference::Fixed(38_400));
    }

    #[test]
    fn rejects_unknown_speed() {
        let err = Cli::try_parse_from(["dsclink", "--speed", "1200", "info"])
            .expect_err("unsupported speed should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn rejects_bad_selector() {
        let err = Cli::try_parse_from(["dsclink", "get", "first"])
            .expect_err("unknown selector should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn set_flash_takes_names_or_codes() {
        let cli = Cli::try_parse_from(["dsclink", "set-flash", "strobe"])
            .expect("set-flash should parse");
        assert!(matches!(cli.command, Command::SetFlash(_)));
        assert!(Cli::try_parse_from(["dsclink", "set-flash", "2"]).is_ok());
    }
}
