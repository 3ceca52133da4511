//! CLI utilities for tether.
//!
//! The utilities present in this module can be used to build an interactive
//! client for a tether server.
use std::{
    fmt::Write as _,
    io::{BufRead, Write},
};

use crate::client::{ResultSet, StatementResult};

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`
    Exit,
    /// `.commit`
    Commit,
    /// `.rollback`
    Rollback,
    /// `.autocommit on|off`
    AutoCommit(bool),
    /// SQL statements
    Statement(String),
}

/// Prompt user for a valid command.
///
/// End of input reads as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(|e| format!("failed to write prompt: {e}"))?;

    let read = reader
        .read_line(&mut s)
        .map_err(|e| format!("failed to read input: {e}"))?;
    if read == 0 {
        return Ok(Command::Exit);
    }

    let line = s.trim();
    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(".exit"), None, _) => Ok(Command::Exit),
        (Some(".commit"), None, _) => Ok(Command::Commit),
        (Some(".rollback"), None, _) => Ok(Command::Rollback),
        (Some(".autocommit"), Some("on"), None) => Ok(Command::AutoCommit(true)),
        (Some(".autocommit"), Some("off"), None) => Ok(Command::AutoCommit(false)),
        _ if !line.starts_with('.') => Ok(Command::Statement(line.to_string())),
        _ => Err(format!("unrecognized command '{line}'")),
    }
}

/// Render a statement result for the terminal.
pub fn render(result: &StatementResult) -> String {
    match result {
        StatementResult::Rows(rows) => render_table(rows),
        StatementResult::Changed(1) => "1 row changed".to_string(),
        StatementResult::Changed(n) => format!("{n} rows changed"),
        StatementResult::Nothing => "ok".to_string(),
    }
}

fn render_table(rows: &ResultSet) -> String {
    let header: Vec<String> = rows.fields().map(|f| f.name.clone()).collect();
    let body: Vec<Vec<String>> = rows
        .rows()
        .map(|row| row.into_iter().map(ToString::to_string).collect())
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &body {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    write_row(&mut out, &header, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(&mut out, &rule, &widths);
    for row in &body {
        write_row(&mut out, row, &widths);
    }
    let _ = write!(
        out,
        "({} row{})",
        rows.row_count(),
        if rows.row_count() == 1 { "" } else { "s" }
    );
    out
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    let _ = writeln!(out, "{}", line.join(" | ").trim_end());
}
