use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use dsclink_session::PictureInfo;
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::{Connection, Context, GetArgs};
use crate::exit::{io_error, session_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

/// Which pictures a `get` argument refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    All,
    Last,
    Single(u32),
    Range(u32, u32),
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid picture selector '{s}': expected all, last, N or A-B");
        match s {
            "all" => Ok(Selector::All),
            "last" => Ok(Selector::Last),
            _ => match s.split_once('-') {
                Some((start, end)) => {
                    let start = start.parse().map_err(|_| invalid())?;
                    let end = end.parse().map_err(|_| invalid())?;
                    Ok(Selector::Range(start, end))
                }
                None => s.parse().map(Selector::Single).map_err(|_| invalid()),
            },
        }
    }
}

impl Selector {
    /// Whether `picture` is selected. `last` is the highest picture number
    /// in the camera.
    pub fn matches(self, picture: &PictureInfo, by_number: bool, last: Option<u32>) -> bool {
        let key = if by_number {
            picture.number
        } else {
            Some(u32::from(picture.index))
        };
        match self {
            Selector::All => true,
            Selector::Last => last.is_some() && picture.number == last,
            Selector::Single(n) => key == Some(n),
            Selector::Range(start, end) => key.is_some_and(|k| (start..=end).contains(&k)),
        }
    }
}

/// Pictures picked by any selector, in camera order.
pub fn select<'a>(
    pictures: &'a [PictureInfo],
    selectors: &[Selector],
    by_number: bool,
) -> Vec<&'a PictureInfo> {
    let last = pictures.iter().filter_map(|p| p.number).max();
    pictures
        .iter()
        .filter(|p| selectors.iter().any(|s| s.matches(p, by_number, last)))
        .collect()
}

/// A download in progress. The file is removed unless it is persisted.
pub struct PartialDownload {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl PartialDownload {
    pub fn create(dir: &Path) -> io::Result<Self> {
        let path = dir.join(format!(".dsclink-{}.part", std::process::id()));
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file: Some(BufWriter::new(file)),
        })
    }

    pub fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("download already finished"))
    }

    /// Flush, check the size and move the file to `dest`.
    pub fn persist(mut self, dest: &Path, expected: u64) -> CliResult<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| CliError::new(DATA_INVALID, "download already finished"))?;
        let file = file
            .into_inner()
            .map_err(|err| io_error("cannot write picture file", err.into_error()))?;
        let written = file
            .metadata()
            .map_err(|err| io_error("cannot stat picture file", err))?
            .len();
        drop(file);
        if written != expected {
            return Err(CliError::new(
                DATA_INVALID,
                format!(
                    "short picture file ({written} of {expected} bytes): disk full or quota exceeded"
                ),
            ));
        }
        fs::rename(&self.path, dest).map_err(|err| io_error("cannot rename picture file", err))
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        self.file = None;
        // After a successful rename there is nothing left to remove.
        let _ = fs::remove_file(&self.path);
    }
}

#[derive(Serialize)]
struct Downloaded {
    index: u16,
    name: String,
    size: u32,
    seconds: f64,
    bytes_per_second: u64,
}

#[derive(Serialize)]
struct GetOutput {
    downloaded: Vec<Downloaded>,
    skipped: Vec<String>,
    deleted: usize,
}

pub fn run(args: GetArgs, ctx: &Context) -> CliResult<i32> {
    let mut conn = Connection::open(ctx)?;
    let pictures = conn
        .camera()
        .pictures()
        .map_err(|err| session_error("cannot read picture list", err))?;

    let mut out = GetOutput {
        downloaded: Vec::new(),
        skipped: Vec::new(),
        deleted: 0,
    };
    for picture in select(&pictures, &args.selectors, args.by_number) {
        ctx.checkpoint()?;
        let dest = args.dir.join(&picture.name);
        if !args.force && dest.exists() {
            out.skipped.push(picture.name.clone());
            continue;
        }
        out.downloaded.push(download(&mut conn, picture, &args.dir, &dest)?);
    }

    if args.delete {
        // Highest index first so the remaining indexes stay valid.
        let mut indexes: Vec<u16> = out
            .downloaded
            .iter()
            .map(|d| d.index)
            .collect();
        indexes.sort_unstable_by(|a, b| b.cmp(a));
        for index in indexes {
            ctx.checkpoint()?;
            let status = conn
                .camera()
                .erase_picture(index)
                .map_err(|err| session_error("cannot delete picture", err))?;
            if status == 0 {
                out.deleted += 1;
            } else {
                warn!(index, status, "camera refused to delete picture");
            }
        }
    }
    conn.close()?;

    print_output(&out, ctx.format);
    Ok(SUCCESS)
}

fn download(
    conn: &mut Connection,
    picture: &PictureInfo,
    dir: &Path,
    dest: &Path,
) -> CliResult<Downloaded> {
    let mut partial =
        PartialDownload::create(dir).map_err(|err| io_error("cannot create picture file", err))?;
    let started = Instant::now();
    let writer = partial
        .writer()
        .map_err(|err| io_error("cannot write picture file", err))?;
    conn.camera()
        .download_picture(picture.index, writer)
        .map_err(|err| session_error(&format!("download of {} failed", picture.name), err))?;
    writer
        .flush()
        .map_err(|err| io_error("cannot write picture file", err))?;
    partial.persist(dest, u64::from(picture.size))?;

    let seconds = started.elapsed().as_secs_f64().max(0.001);
    let bytes_per_second = (f64::from(picture.size) / seconds) as u64;
    info!(name = %picture.name, size = picture.size, bytes_per_second, "picture downloaded");
    Ok(Downloaded {
        index: picture.index,
        name: picture.name.clone(),
        size: picture.size,
        seconds: (seconds * 100.0).round() / 100.0,
        bytes_per_second,
    })
}

fn print_output(out: &GetOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut t = table(&["#", "NAME", "SIZE", "SECONDS", "BYTES/S"]);
            for d in &out.downloaded {
                t.add_row(vec![
                    d.index.to_string(),
                    d.name.clone(),
                    d.size.to_string(),
                    format!("{:.2}", d.seconds),
                    d.bytes_per_second.to_string(),
                ]);
            }
            println!("{t}");
            print_summary(out);
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for d in &out.downloaded {
                println!(
                    "{:3}   {:>12}  {:6.2} seconds, {:6} bytes/s",
                    d.index, d.name, d.seconds, d.bytes_per_second
                );
            }
            print_summary(out);
        }
    }
}

fn print_summary(out: &GetOutput) {
    if !out.skipped.is_empty() {
        println!("Skipped {} existing picture(s).", out.skipped.len());
    }
    if out.deleted > 0 {
        println!("Deleted {} picture(s).", out.deleted);
    }
}
