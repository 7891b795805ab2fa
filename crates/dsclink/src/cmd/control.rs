use std::fs::File;
use std::io::{self, BufWriter, Write};

use chrono::{DateTime, Local, Utc};
use dsclink_session::op;
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{
    Connection, Context, DeleteArgs, FlashChargeArgs, PreviewArgs, SetDateArgs, SetFlashArgs,
    SetIdArgs,
};
use crate::exit::{io_error, session_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct ShotOutput {
    frame: u32,
    name: String,
    size: u32,
}

pub fn shoot(ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    conn.require(&[op::TAKE_PICTURE], "shoot")?;
    let camera = conn.camera();
    let frame = camera
        .take_picture()
        .map_err(|err| session_error("cannot take picture", err))?;
    let index = u16::try_from(frame)
        .map_err(|_| CliError::new(FAILURE, format!("camera reported frame {frame}")))?;
    let name = camera
        .picture_name(index)
        .map_err(|err| session_error("cannot read picture name", err))?;
    let size = camera
        .picture_size(index)
        .map_err(|err| session_error("cannot read picture size", err))?;
    conn.close()?;

    let out = ShotOutput { frame, name, size };
    match ctx.format {
        OutputFormat::Json => print_json(&out),
        _ => println!("{:3}   {:>12}  {:7}", out.frame, out.name, out.size),
    }
    Ok(SUCCESS)
}

pub fn preview(args: PreviewArgs, ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    conn.require(&[op::TAKE_PREVIEW, op::PREVIEW_DATA], "preview")?;
    let bytes = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| io_error(&path.display().to_string(), err))?;
            let mut sink = BufWriter::new(file);
            let bytes = capture(&mut conn, &mut sink)?;
            sink.flush()
                .map_err(|err| io_error(&path.display().to_string(), err))?;
            bytes
        }
        None => {
            let stdout = io::stdout();
            let mut sink = stdout.lock();
            let bytes = capture(&mut conn, &mut sink)?;
            sink.flush().map_err(|err| io_error("stdout", err))?;
            bytes
        }
    };
    conn.close()?;
    info!(bytes, "preview captured");
    Ok(SUCCESS)
}

fn capture<W: Write>(conn: &mut Connection, sink: &mut W) -> CliResult<u64> {
    conn.camera()
        .capture_preview(sink)
        .map_err(|err| session_error("cannot capture preview", err))
}

pub fn flash_charge(args: FlashChargeArgs, ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    conn.require(&[op::CHARGE_FLASH], "charge flash")?;
    let status = conn
        .camera()
        .charge_flash(args.amount)
        .map_err(|err| session_error("cannot charge flash", err))?;
    conn.close()?;
    report_status("flash-charge", status, ctx.format);
    Ok(SUCCESS)
}

pub fn set_flash(args: SetFlashArgs, ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    conn.require(&[op::SET_FLASH_MODE], "set flash mode")?;
    let status = conn
        .camera()
        .set_flash_mode(args.mode)
        .map_err(|err| session_error("cannot set flash mode", err))?;
    conn.close()?;
    report_status("set-flash", status, ctx.format);
    Ok(SUCCESS)
}

pub fn set_id(args: SetIdArgs, ctx: &Context) -> CliResult<i32> {
    if args.id.len() > dsclink_session::camera::MAX_ID_LEN {
        return Err(CliError::usage(format!(
            "camera id '{}' is longer than {} characters",
            args.id,
            dsclink_session::camera::MAX_ID_LEN
        )));
    }
    let mut conn = Connection::open(ctx)?;
    conn.require(&[op::SET_CAMERA_ID], "set camera id")?;
    conn.camera()
        .set_camera_id(&args.id)
        .map_err(|err| session_error("cannot set camera id", err))?;
    conn.close()?;
    Ok(SUCCESS)
}

pub fn set_date(args: SetDateArgs, ctx: &Context) -> CliResult<i32> {
    let digits = resolve_date(&args.when, Utc::now()).map_err(CliError::usage)?;
    let mut conn = Connection::open(ctx)?;
    conn.require(&[op::SET_DATE], "set date")?;
    info!(date = %digits, "setting camera clock");
    conn.camera()
        .set_date(&digits)
        .map_err(|err| session_error("cannot set date", err))?;
    conn.close()?;
    Ok(SUCCESS)
}

/// Turn `gmt`/`utc`, `local` or explicit digits into `YYYYMMDDHHMMSS`.
pub fn resolve_date(when: &str, now: DateTime<Utc>) -> Result<String, String> {
    const FORMAT: &str = "%Y%m%d%H%M%S";
    match when {
        "gmt" | "utc" => Ok(now.format(FORMAT).to_string()),
        "local" => Ok(now.with_timezone(&Local).format(FORMAT).to_string()),
        digits
            if digits.len() == dsclink_session::camera::DATE_LEN
                && digits.bytes().all(|b| b.is_ascii_digit()) =>
        {
            Ok(digits.to_string())
        }
        other => Err(format!(
            "invalid date '{other}': expected gmt, utc, local or YYYYMMDDHHMMSS"
        )),
    }
}

#[derive(Serialize)]
struct DeleteOutput {
    deleted: Vec<String>,
    missing: Vec<String>,
    refused: Vec<String>,
}

pub fn delete(args: DeleteArgs, ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    let mut pictures = conn
        .camera()
        .pictures()
        .map_err(|err| session_error("cannot read picture list", err))?;

    let mut out = DeleteOutput {
        deleted: Vec::new(),
        missing: Vec::new(),
        refused: Vec::new(),
    };
    for name in args.names {
        ctx.checkpoint()?;
        let Some(picture) = pictures.iter().find(|p| p.name == name) else {
            warn!(%name, "no such picture in camera");
            out.missing.push(name);
            continue;
        };
        let status = conn
            .camera()
            .erase_picture(picture.index)
            .map_err(|err| session_error(&format!("cannot delete {name}"), err))?;
        if status != 0 {
            warn!(%name, status, "camera refused to delete picture");
            out.refused.push(name);
            continue;
        }
        // Indexes shift after an erase.
        pictures = conn
            .camera()
            .pictures()
            .map_err(|err| session_error("cannot read picture list", err))?;
        out.deleted.push(name);
    }
    conn.close()?;

    match ctx.format {
        OutputFormat::Json => print_json(&out),
        _ => println!("Deleted {} picture(s).", out.deleted.len()),
    }
    if out.missing.is_empty() && out.refused.is_empty() {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

fn report_status(action: &str, status: u8, format: OutputFormat) {
    #[derive(Serialize)]
    struct StatusOutput<'a> {
        action: &'a str,
        status: u8,
    }

    match format {
        OutputFormat::Json => print_json(&StatusOutput { action, status }),
        _ => println!("{action}: status {status}"),
    }
}
