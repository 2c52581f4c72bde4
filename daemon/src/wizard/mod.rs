/// Interactive setup wizards. Both read answers line by line and save their
/// result into the config file with [`crate::config::update_document`].
use std::io::{BufRead, Write};

use anyhow::Result;

pub mod audio;
pub mod detect;

/// Prints `message` and reads one line. `None` on end of input.
pub(crate) fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, message: &str) -> Result<Option<String>> {
    write!(out, "{message}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Runs `edit` on the sub-table `key` of `table`, creating it (or replacing a
/// non-table value) first.
pub(crate) fn edit_table<F>(table: &mut toml::Table, key: &str, edit: F)
where
    F: FnOnce(&mut toml::Table),
{
    let mut sub = match table.remove(key) {
        Some(toml::Value::Table(t)) => t,
        _ => toml::Table::new(),
    };
    edit(&mut sub);
    table.insert(key.to_string(), toml::Value::Table(sub));
}
