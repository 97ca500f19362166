//! Text table and YAML output.

use console::style;
use serde::Serialize;
use std::io::{self, Write};
use thiserror::Error;

use crate::domain::KeyRecord;

/// Column headers of the key table, in record field order.
pub const KEY_COLUMNS: [&str; 5] = ["ComputerName", "Hive", "Key", "SubKeyCount", "ValueCount"];

/// How records are written to standard output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns.
    #[default]
    Table,
    /// YAML sequence of records.
    Yaml,
}

/// Errors that can occur when writing command output.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Writing to the output failed.
    #[error("failed to write output")]
    Io(#[from] io::Error),

    /// A record could not be serialized.
    #[error("failed to serialize output as YAML: {0}")]
    Yaml(String),
}

/// Horizontal alignment of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    /// Pad on the right.
    Left,
    /// Pad on the left, for numbers.
    Right,
}

/// A column-aligned text table.
///
/// Rows are buffered: column widths are only known once every row is in.
#[derive(Debug, Clone)]
pub struct Table {
    /// Header cells.
    headers: Vec<String>,
    /// One entry per header.
    align: Vec<Align>,
    /// Body rows; missing cells render empty.
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Empty table with left-aligned `headers`.
    #[must_use]
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| (*h).to_owned()).collect(),
            align: vec![Align::Left; headers.len()],
            rows: Vec::new(),
        }
    }

    /// Right-align `column`. Out-of-range columns are ignored.
    #[must_use]
    pub fn align_right(mut self, column: usize) -> Self {
        if let Some(align) = self.align.get_mut(column) {
            *align = Align::Right;
        }
        self
    }

    /// Append a row.
    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Whether no row was pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Widest cell of each column, header included, in characters.
    fn widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(i))
                    .map(|cell| cell.chars().count())
                    .chain([header.chars().count()])
                    .max()
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Write the header, an underline and every row.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `out` fails.
    pub fn write(&self, out: &mut dyn Write) -> io::Result<()> {
        let widths = self.widths();

        let header: Vec<String> = self
            .headers
            .iter()
            .zip(&widths)
            .zip(&self.align)
            .map(|((cell, width), align)| style(pad(cell, *width, *align)).bold().to_string())
            .collect();
        writeln!(out, "{}", header.join(" ").trim_end())?;

        let underline: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
        writeln!(out, "{}", underline.join(" "))?;

        for row in &self.rows {
            let cells: Vec<String> = widths
                .iter()
                .zip(&self.align)
                .enumerate()
                .map(|(i, (width, align))| {
                    pad(row.get(i).map_or("", String::as_str), *width, *align)
                })
                .collect();
            writeln!(out, "{}", cells.join(" ").trim_end())?;
        }
        Ok(())
    }
}

/// Pad `cell` to `width` characters.
fn pad(cell: &str, width: usize, align: Align) -> String {
    match align {
        Align::Left => format!("{cell:<width$}"),
        Align::Right => format!("{cell:>width$}"),
    }
}

/// Render key records in `format`.
///
/// # Errors
///
/// Returns [`RenderError::Io`] if writing fails.
/// Returns [`RenderError::Yaml`] if the records cannot be serialized.
pub fn write_records(
    records: &[KeyRecord],
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), RenderError> {
    match format {
        OutputFormat::Table => {
            if records.is_empty() {
                return Ok(());
            }
            let mut table = Table::new(&KEY_COLUMNS).align_right(3).align_right(4);
            for record in records {
                table.push(vec![
                    record.computer_name.clone(),
                    record.hive.to_string(),
                    record.key.clone(),
                    record.sub_key_count.to_string(),
                    record.value_count.to_string(),
                ]);
            }
            table.write(out)?;
        }
        OutputFormat::Yaml => {
            write_yaml(records, out)?;
        }
    }
    Ok(())
}

/// Write `items` as one YAML sequence, one entry as soon as it arrives.
///
/// An empty input is written as `[]`. Returns how many entries were written.
///
/// # Errors
///
/// Returns [`RenderError::Io`] if writing fails.
/// Returns [`RenderError::Yaml`] if an entry cannot be serialized.
pub fn write_yaml<I>(items: I, out: &mut dyn Write) -> Result<usize, RenderError>
where
    I: IntoIterator,
    I::Item: Serialize,
{
    let mut written: usize = 0;
    for item in items {
        let entry =
            serde_saphyr::to_string(&[item]).map_err(|e| RenderError::Yaml(e.to_string()))?;
        out.write_all(entry.as_bytes())?;
        out.flush()?;
        written = written.saturating_add(1);
    }
    if written == 0 {
        out.write_all(b"[]\n")?;
    }
    Ok(written)
}
