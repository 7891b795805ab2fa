use std::path::Path;

use dsclink_session::{op, Camera, PictureInfo};
use dsclink_transport::SerialLink;
use serde::Serialize;

use crate::cmd::{Connection, Context, InfoArgs, ListArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

#[derive(Serialize)]
struct PictureRow {
    index: u16,
    name: String,
    number: Option<u32>,
    size: u32,
    on_disk: bool,
}

#[derive(Serialize)]
struct InfoOutput {
    device: String,
    speed: u32,
    version: Option<String>,
    camera_type: Option<String>,
    date: Option<String>,
    camera_id: Option<String>,
    free_memory: Option<u32>,
    flash_mode: Option<String>,
    commands: Vec<String>,
    pictures: Vec<PictureRow>,
}

pub fn run_info(args: InfoArgs, ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    let commands: Vec<String> = conn
        .commands()?
        .codes()
        .iter()
        .map(|code| format!("{code:02x}"))
        .collect();

    let version = query(&mut conn, op::VERSION_INFO, |c| c.version_info())?;
    let camera_type = query(&mut conn, op::CAMERA_TYPE, |c| c.camera_type())?;
    let date = query(&mut conn, op::DATE, |c| c.date())?;
    let camera_id = query(&mut conn, op::CAMERA_ID, |c| c.camera_id())?;
    let free_memory = query(&mut conn, op::FREE_MEMORY, |c| c.free_memory())?;
    let flash_mode = query(&mut conn, op::FLASH_MODE, |c| c.flash_mode())?
        .map(|mode| format!("{} ({mode})", mode.code()));
    let pictures = read_pictures(&mut conn, &args.dir)?;
    let speed = conn.camera().session().speed();
    conn.close()?;

    let out = InfoOutput {
        device: ctx.device.display().to_string(),
        speed,
        version,
        camera_type,
        date,
        camera_id,
        free_memory,
        flash_mode,
        commands,
        pictures,
    };

    match ctx.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => {
            println!("Camera Info:");
            println!("  Device:       {} ({} bps)", out.device, out.speed);
            let fields = [
                ("Version info", out.version.clone()),
                ("Camera type", out.camera_type.clone()),
                ("Camera date", out.date.clone()),
                ("Camera ID", out.camera_id.clone()),
                ("Free memory", out.free_memory.map(|b| format!("{} kb", b >> 10))),
                ("Flash mode", out.flash_mode.clone()),
            ];
            for (label, value) in fields {
                if let Some(value) = value {
                    println!("  {:<13} {value}", format!("{label}:"));
                }
            }
            if !out.commands.is_empty() {
                println!("  Commands:     {}", out.commands.join(" "));
            }
            print_pictures(&out.pictures, ctx.format);
        }
    }
    Ok(SUCCESS)
}

pub fn run_list(args: ListArgs, ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    let pictures = read_pictures(&mut conn, &args.dir)?;
    conn.close()?;

    match ctx.format {
        OutputFormat::Json => print_json(&pictures),
        other => print_pictures(&pictures, other),
    }
    Ok(SUCCESS)
}

/// Run a query only when the camera advertises it.
fn query<T>(
    conn: &mut Connection,
    operation: u8,
    f: impl FnOnce(&mut Camera<SerialLink>) -> dsclink_session::Result<T>,
) -> CliResult<Option<T>> {
    if !conn.supports(operation)? {
        return Ok(None);
    }
    f(conn.camera())
        .map(Some)
        .map_err(|err| session_error(&format!("query {operation:#04x} failed"), err))
}

fn read_pictures(conn: &mut Connection, dir: &Path) -> CliResult<Vec<PictureRow>> {
    let pictures = conn
        .camera()
        .pictures()
        .map_err(|err| session_error("cannot read picture list", err))?;
    Ok(pictures
        .into_iter()
        .map(|p| picture_row(p, dir))
        .collect())
}

fn picture_row(picture: PictureInfo, dir: &Path) -> PictureRow {
    PictureRow {
        on_disk: dir.join(&picture.name).exists(),
        index: picture.index,
        name: picture.name,
        number: picture.number,
        size: picture.size,
    }
}

fn print_pictures(pictures: &[PictureRow], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut t = table(&["#", "NAME", "SIZE", "ON DISK"]);
            for p in pictures {
                t.add_row(vec![
                    p.index.to_string(),
                    p.name.clone(),
                    p.size.to_string(),
                    if p.on_disk { "*" } else { "" }.to_string(),
                ]);
            }
            println!("{t}");
        }
        _ => {
            for p in pictures {
                let mark = if p.on_disk { '*' } else { ' ' };
                println!("{:3}{mark}  {:>12}  {:7}", p.index, p.name, p.size);
            }
        }
    }
}
