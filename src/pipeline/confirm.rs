use anyhow::{Context, Result};
use std::io::{BufRead, Write};

pub const CONFIRMATION_PHRASE: &str = "DELETE";

/// Print the destructive-run banner and wait for the operator to type the phrase.
pub fn confirm_destructive<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    target: &str,
    existing: Option<u64>,
) -> Result<bool> {
    writeln!(out, "WARNING: this run deletes every document in {target}")?;
    if let Some(count) = existing {
        writeln!(out, "  documents currently stored: {count}")?;
    }
    writeln!(
        out,
        "  the collection is empty until the insert phase finishes"
    )?;
    write!(out, "Type {CONFIRMATION_PHRASE} to continue: ")?;
    out.flush()?;

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed to read confirmation from stdin")?;
    let answer = line.trim_end_matches(['\r', '\n']);
    Ok(answer == CONFIRMATION_PHRASE)
}
