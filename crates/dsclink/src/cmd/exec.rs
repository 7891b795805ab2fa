use serde::Serialize;

use crate::cmd::{Connection, Context, ExecArgs};
use crate::exit::{session_error, CliError, CliResult, SUCCESS};
use crate::output::{hex, preview, print_json, print_raw, OutputFormat};

#[derive(Serialize)]
struct ExecOutput {
    category: u8,
    operation: u8,
    params: String,
    answer: String,
    answer_size: usize,
    text: String,
}

pub fn run(args: ExecArgs, ctx: &Context) -> CliResult<i32> {
    let category = parse_byte(&args.category).map_err(CliError::usage)?;
    let operation = parse_byte(&args.operation).map_err(CliError::usage)?;
    let params = parse_hex(&args.params).map_err(CliError::usage)?;

    let mut conn = Connection::open(ctx)?;
    let answer = conn
        .camera()
        .session_mut()
        .execute_raw(category, operation, &params)
        .map_err(|err| session_error(&format!("command {operation:#04x} failed"), err))?;
    conn.close()?;

    let out = ExecOutput {
        category,
        operation,
        params: hex(&params),
        answer: hex(&answer),
        answer_size: answer.len(),
        text: preview(&answer),
    };
    match ctx.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Raw => print_raw(&answer),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Command {category:02x} {operation:02x}:");
            println!("  Answer size: {} bytes", out.answer_size);
            println!("  Answer:      {}", out.answer);
            println!("  Text:        {}", out.text);
        }
    }
    Ok(SUCCESS)
}

/// Decimal, or hex with a `0x` prefix.
fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u8::from_str_radix(digits, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid byte '{s}': expected 0-255 or 0x00-0xff"))
}

/// Hex digit pairs, optionally separated by spaces or colons.
fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("invalid hex '{s}': odd number of digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex '{s}'"))
        })
        .collect()
}
