use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use dsclink_session::{op, UploadOutcome};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{Connection, Context, PutArgs};
use crate::exit::{io_error, session_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

/// Numbers below this are never chosen for renamed uploads.
const FIRST_AUTO_NUMBER: u32 = 100;
const MAX_PICTURE_NUMBER: u32 = 99_999;

/// Whether `name` already follows the camera's `DSCnnnnn.JPG` scheme.
pub fn is_camera_name(name: &str) -> bool {
    name.len() == 12 && name.starts_with("DSC") && name.get(8..) == Some(".JPG")
}

/// Hands out fresh camera names above the highest number in use.
#[derive(Debug)]
pub struct NameAllocator {
    highest: u32,
}

impl NameAllocator {
    pub fn new(numbers: impl IntoIterator<Item = u32>) -> Self {
        let highest = numbers.into_iter().fold(FIRST_AUTO_NUMBER, u32::max);
        Self { highest }
    }

    pub fn next_name(&mut self) -> String {
        if self.highest < MAX_PICTURE_NUMBER {
            self.highest += 1;
        }
        format!("DSC{:05}.JPG", self.highest)
    }

    /// The name to upload `path` under.
    pub fn name_for(&mut self, path: &Path) -> String {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if is_camera_name(name) => name.to_string(),
            _ => self.next_name(),
        }
    }
}

#[derive(Serialize)]
struct Uploaded {
    file: String,
    name: String,
    status: &'static str,
    bytes: u64,
}

pub fn run(args: PutArgs, ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    conn.require(&[op::UPLOAD_DATA, op::UPLOAD_NAME], "upload pictures")?;
    let pictures = conn
        .camera()
        .pictures()
        .map_err(|err| session_error("cannot read picture list", err))?;
    let mut names = NameAllocator::new(pictures.iter().filter_map(|p| p.number));

    let mut results = Vec::new();
    for path in &args.files {
        ctx.checkpoint()?;
        let file = File::open(path).map_err(|err| io_error(&path.display().to_string(), err))?;
        let size = file
            .metadata()
            .map_err(|err| io_error(&path.display().to_string(), err))?
            .len();
        let free = conn
            .camera()
            .free_memory()
            .map_err(|err| session_error("cannot read free memory", err))?;
        let file_label = path.display().to_string();
        if size > u64::from(free) {
            warn!(file = %file_label, size, free, "not enough space in camera");
            results.push(Uploaded {
                file: file_label,
                name: String::new(),
                status: "no-space",
                bytes: 0,
            });
            continue;
        }

        let name = names.name_for(path);
        let outcome = conn
            .camera()
            .upload_picture(&name, BufReader::new(file))
            .map_err(|err| session_error(&format!("upload of {file_label} failed"), err))?;
        let (status, bytes) = match outcome {
            UploadOutcome::Accepted { bytes } => {
                info!(file = %file_label, %name, bytes, "picture uploaded");
                ("ok", bytes)
            }
            UploadOutcome::Rejected { .. } => ("rejected", 0),
        };
        results.push(Uploaded {
            file: file_label,
            name,
            status,
            bytes,
        });
    }
    conn.close()?;

    print_results(&results, ctx.format);
    if results.iter().all(|r| r.status == "ok") {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

fn print_results(results: &[Uploaded], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&results),
        OutputFormat::Table => {
            let mut t = table(&["FILE", "NAME", "STATUS", "BYTES"]);
            for r in results {
                t.add_row(vec![
                    r.file.clone(),
                    r.name.clone(),
                    r.status.to_string(),
                    r.bytes.to_string(),
                ]);
            }
            println!("{t}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for r in results {
                println!("{} -> {} ({}, {} bytes)", r.file, r.name, r.status, r.bytes);
            }
        }
    }
}
