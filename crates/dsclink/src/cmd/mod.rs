use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Subcommand};
use dsclink_session::{Camera, CommandSet, FlashMode, SessionConfig, SessionError, SpeedPreference};
use dsclink_transport::{LinkConfig, SerialLink};
use tracing::{debug, info};

use crate::exit::{session_error, CliError, CliResult, FAILURE, INTERNAL, INTERRUPTED};
use crate::output::OutputFormat;

pub mod control;
pub mod exec;
pub mod get;
pub mod info;
pub mod put;
pub mod version;

use get::Selector;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show camera details and the picture list.
    Info(InfoArgs),
    /// List the pictures stored in the camera.
    List(ListArgs),
    /// Download pictures.
    Get(GetArgs),
    /// Upload pictures into the camera.
    Put(PutArgs),
    /// Take a picture.
    Shoot,
    /// Capture a preview image.
    Preview(PreviewArgs),
    /// Recharge the flash.
    FlashCharge(FlashChargeArgs),
    /// Set the flash mode.
    SetFlash(SetFlashArgs),
    /// Set the camera identifier.
    SetId(SetIdArgs),
    /// Set the camera clock.
    SetDate(SetDateArgs),
    /// Delete pictures by name.
    Delete(DeleteArgs),
    /// Send a raw command and print the answer.
    Exec(ExecArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub device: PathBuf,
    pub speed: SpeedPreference,
    pub ds7: bool,
    pub format: OutputFormat,
    /// Raised by SIGINT; handed to the session before the link opens.
    pub cancel: Arc<AtomicBool>,
}

impl Context {
    pub fn interrupted(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Fail with [`INTERRUPTED`] once Ctrl-C was pressed.
    pub fn checkpoint(&self) -> CliResult<()> {
        if self.interrupted() {
            return Err(CliError::new(INTERRUPTED, "interrupted"));
        }
        Ok(())
    }

    fn session_failure(&self, context: &str, err: SessionError) -> CliError {
        if self.interrupted() {
            return CliError::new(INTERRUPTED, format!("{context}: interrupted ({err})"));
        }
        session_error(context, err)
    }
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run_info(args, ctx),
        Command::List(args) => info::run_list(args, ctx),
        Command::Get(args) => get::run(args, ctx),
        Command::Put(args) => put::run(args, ctx),
        Command::Shoot => control::shoot(ctx),
        Command::Preview(args) => control::preview(args, ctx),
        Command::FlashCharge(args) => control::flash_charge(args, ctx),
        Command::SetFlash(args) => control::set_flash(args, ctx),
        Command::SetId(args) => control::set_id(args, ctx),
        Command::SetDate(args) => control::set_date(args, ctx),
        Command::Delete(args) => control::delete(args, ctx),
        Command::Exec(args) => exec::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Directory checked for already downloaded pictures.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory checked for already downloaded pictures.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// `all`, `last`, a number or a range such as `2-10`.
    #[arg(required = true)]
    pub selectors: Vec<Selector>,
    /// Overwrite pictures that already exist locally.
    #[arg(long, short = 'f')]
    pub force: bool,
    /// Select by the number in the file name instead of the frame index.
    #[arg(long, short = 'p')]
    pub by_number: bool,
    /// Delete pictures from the camera after a successful download.
    #[arg(long, short = 'd')]
    pub delete: bool,
    /// Where downloaded pictures are written.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    /// JPEG files to upload.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Write the preview here instead of standard output.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct FlashChargeArgs {
    pub amount: u16,
}

#[derive(Args, Debug)]
pub struct SetFlashArgs {
    /// off, on, strobe, auto (or 0-3).
    pub mode: FlashMode,
}

#[derive(Args, Debug)]
pub struct SetIdArgs {
    /// Up to 10 characters.
    pub id: String,
}

#[derive(Args, Debug)]
pub struct SetDateArgs {
    /// `gmt` (or `utc`), `local`, or `YYYYMMDDHHMMSS`.
    pub when: String,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Picture names such as `DSC00042.JPG`.
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Category byte (decimal or 0x-prefixed hex).
    pub category: String,
    /// Operation byte (decimal or 0x-prefixed hex).
    pub operation: String,
    /// Parameter bytes as hex, e.g. `0100`.
    #[arg(long, default_value = "")]
    pub params: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// An open camera at the negotiated speed.
pub struct Connection {
    camera: Camera<SerialLink>,
    ds7: bool,
    commands: Option<CommandSet>,
}

impl Connection {
    pub fn open(ctx: &Context) -> CliResult<Self> {
        let config = SessionConfig {
            cancel: Arc::clone(&ctx.cancel),
            ..SessionConfig::default()
        };
        let mut session =
            dsclink_session::open_with_config(&ctx.device, LinkConfig::default(), config)
                .map_err(|err| ctx.session_failure("cannot open camera", err))?;
        ctx.checkpoint()?;
        let speed = session
            .set_preferred_speed(ctx.speed)
            .map_err(|err| ctx.session_failure("speed negotiation failed", err))?;
        ctx.checkpoint()?;
        info!(device = %ctx.device.display(), speed, "camera ready");
        Ok(Self {
            camera: Camera::new(session),
            ds7: ctx.ds7,
            commands: None,
        })
    }

    pub fn camera(&mut self) -> &mut Camera<SerialLink> {
        &mut self.camera
    }

    /// The command set, queried once on first use.
    pub fn commands(&mut self) -> CliResult<&CommandSet> {
        if self.commands.is_none() {
            let set = if self.ds7 {
                CommandSet::minimal()
            } else {
                self.camera
                    .command_set()
                    .map_err(|err| session_error("cannot read command list", err))?
            };
            debug!(count = set.codes().len(), "command set known");
            self.commands = Some(set);
        }
        Ok(self.commands.get_or_insert_with(CommandSet::minimal))
    }

    pub fn supports(&mut self, operation: u8) -> CliResult<bool> {
        Ok(self.commands()?.supports(operation))
    }

    /// Fail unless every listed operation is supported.
    pub fn require(&mut self, operations: &[u8], action: &str) -> CliResult<()> {
        for &operation in operations {
            if !self.supports(operation)? {
                return Err(CliError::new(
                    FAILURE,
                    format!("cannot {action} (unsupported command {operation:#04x})"),
                ));
            }
        }
        Ok(())
    }

    pub fn close(self) -> CliResult<()> {
        self.camera
            .into_session()
            .close()
            .map_err(|err| session_error("closing the link failed", err))
    }
}

/// Route SIGINT to a cancellation flag for the whole process.
///
/// Must run before any link is opened: the default action would kill the
/// process with the line still in raw mode.
pub fn install_interrupt_handler() -> CliResult<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::DEVICE_UNRESPONSIVE;

    fn context() -> Context {
        Context {
            device: PathBuf::from("/dev/null"),
            speed: SpeedPreference::Auto,
            ds7: false,
            format: OutputFormat::Json,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn checkpoint_fails_once_interrupted() {
        let ctx = context();
        assert!(ctx.checkpoint().is_ok());

        ctx.cancel.store(true, Ordering::SeqCst);
        let err = ctx.checkpoint().unwrap_err();
        assert_eq!(err.code, INTERRUPTED);
    }

    #[test]
    fn open_failure_after_interrupt_reports_interruption() {
        let ctx = context();
        let unresponsive = || SessionError::DeviceUnresponsive { attempts: 3 };

        let err = ctx.session_failure("cannot open camera", unresponsive());
        assert_eq!(err.code, DEVICE_UNRESPONSIVE);

        ctx.cancel.store(true, Ordering::SeqCst);
        let err = ctx.session_failure("cannot open camera", unresponsive());
        assert_eq!(err.code, INTERRUPTED);
        assert!(err.message.starts_with("cannot open camera: interrupted"));
    }
}
