//! Shared CSV plumbing for the three tables.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sanitize a field before it is written.
/// Commas become `;` so the row stays splittable; line breaks become spaces.
pub(crate) fn escape(field: &str) -> String {
    field
        .chars()
        .map(|c| match c {
            ',' => ';',
            '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

/// Ensure the table file exists with its header row.
pub(crate) fn init_table(path: &Path, header: &str) -> io::Result<()> {
    if !path.exists() {
        fs::write(path, format!("{header}\n"))?;
    }
    Ok(())
}

/// Read all data rows (header skipped, blank lines dropped).
pub(crate) fn read_rows(path: &Path) -> io::Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .skip(1)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Rewrite a table in full: temp file, then atomic rename over the original.
pub(crate) fn rewrite(path: &Path, header: &str, rows: &[String]) -> io::Result<()> {
    let tmp = path.with_extension("csv.tmp");
    let mut contents = String::with_capacity(header.len() + 1 + rows.iter().map(|r| r.len() + 1).sum::<usize>());
    contents.push_str(header);
    contents.push('\n');
    for row in rows {
        contents.push_str(row);
        contents.push('\n');
    }
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

/// Append one row to a table.
pub(crate) fn append_row(path: &Path, row: &str) -> io::Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new().append(true).open(path)?;
    writeln!(file, "{row}")
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
