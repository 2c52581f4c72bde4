/// Default audio device selection for the docked and undocked profiles.
///
/// All render and capture endpoints (active and unplugged) are listed with one
/// running number; each of the six slots of a profile is answered with a number
/// of the matching direction, or left empty to skip.
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::{ask, edit_table};
use crate::actions::audio::{AudioEndpoint, AudioEndpoints, Direction};
use crate::config::{update_document, AudioConfig};

/// Meaning of one answer to a slot prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Empty input: take the slot's default.
    Default,
    Pick(String),
    Invalid,
}

/// Interprets `answer` as a 1-based index into `endpoints`, restricted to `direction`.
pub fn parse_choice(answer: &str, endpoints: &[AudioEndpoint], direction: Direction) -> Choice {
    let answer = answer.trim();
    if answer.is_empty() {
        return Choice::Default;
    }
    match answer.parse::<usize>() {
        Ok(n) if n >= 1 => match endpoints.get(n - 1) {
            Some(e) if e.direction == direction => Choice::Pick(e.name.clone()),
            _ => Choice::Invalid,
        },
        _ => Choice::Invalid,
    }
}

fn index_range(endpoints: &[AudioEndpoint], direction: Direction) -> String {
    let numbers: Vec<usize> = endpoints
        .iter()
        .enumerate()
        .filter(|(_, e)| e.direction == direction)
        .map(|(i, _)| i + 1)
        .collect();
    match (numbers.first(), numbers.last()) {
        (Some(first), Some(last)) if first != last => format!("{first}-{last}"),
        (Some(only), _) => only.to_string(),
        _ => "no device".to_string(),
    }
}

fn ask_slot<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    label: &str,
    endpoints: &[AudioEndpoint],
    direction: Direction,
    default: Option<&str>,
) -> Result<Option<String>> {
    let hint = match default {
        Some(name) => format!(" [enter = same as above: {name}]"),
        None => " [enter to skip]".to_string(),
    };
    loop {
        let Some(answer) = ask(input, out, &format!("  {label}{hint}: "))? else {
            return Ok(default.map(str::to_string));
        };
        match parse_choice(&answer, endpoints, direction) {
            Choice::Default => return Ok(default.map(str::to_string)),
            Choice::Pick(name) => return Ok(Some(name)),
            Choice::Invalid => writeln!(
                out,
                "    Invalid number. Enter {} or press Enter.",
                index_range(endpoints, direction)
            )?,
        }
    }
}

/// Asks the six slots of one profile. Multimedia defaults to the default slot's answer.
pub fn collect_profile<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    endpoints: &[AudioEndpoint],
) -> Result<AudioConfig> {
    let render_default = ask_slot(input, out, "Render Default", endpoints, Direction::Render, None)?;
    let render_multimedia = ask_slot(
        input,
        out,
        "Render Multimedia",
        endpoints,
        Direction::Render,
        render_default.as_deref(),
    )?;
    let render_communications =
        ask_slot(input, out, "Render Communications", endpoints, Direction::Render, None)?;

    let capture_default = ask_slot(input, out, "Capture Default", endpoints, Direction::Capture, None)?;
    let capture_multimedia = ask_slot(
        input,
        out,
        "Capture Multimedia",
        endpoints,
        Direction::Capture,
        capture_default.as_deref(),
    )?;
    let capture_communications =
        ask_slot(input, out, "Capture Communications", endpoints, Direction::Capture, None)?;

    Ok(AudioConfig {
        render_default,
        render_multimedia,
        render_communications,
        capture_default,
        capture_multimedia,
        capture_communications,
    })
}

/// Replaces `[docked.audio]` and `[undocked.audio]`, keeping every other key.
pub fn save_audio(config_path: &Path, docked: &AudioConfig, undocked: &AudioConfig) -> Result<()> {
    let docked = toml::Value::try_from(docked).context("Failed to serialize docked audio")?;
    let undocked = toml::Value::try_from(undocked).context("Failed to serialize undocked audio")?;
    update_document(config_path, |table| {
        edit_table(table, "docked", |profile| {
            profile.insert("audio".to_string(), docked);
        });
        edit_table(table, "undocked", |profile| {
            profile.insert("audio".to_string(), undocked);
        });
    })
}

fn print_section<W: Write>(out: &mut W, title: &str, endpoints: &[(usize, &AudioEndpoint)]) -> Result<()> {
    writeln!(out, "  {title}:")?;
    writeln!(out, "  {:<4} {:<50} State", "#", "Name")?;
    writeln!(out, "  {}", "-".repeat(66))?;
    for (number, endpoint) in endpoints {
        let state = if endpoint.active { "Active" } else { "Unplugged" };
        writeln!(out, "  {number:<4} {:<50} {state}", endpoint.name)?;
    }
    Ok(())
}

/// Runs the wizard. Returns 1 when the system has no audio endpoints.
pub fn run<R: BufRead, W: Write>(
    audio: &dyn AudioEndpoints,
    input: &mut R,
    out: &mut W,
    config_path: &Path,
) -> Result<i32> {
    let mut endpoints = audio.list(Direction::Render, true)?;
    endpoints.extend(audio.list(Direction::Capture, true)?);
    if endpoints.is_empty() {
        writeln!(out, "No audio devices found.")?;
        return Ok(1);
    }

    let numbered: Vec<(usize, &AudioEndpoint)> =
        endpoints.iter().enumerate().map(|(i, e)| (i + 1, e)).collect();
    let of = |direction: Direction| {
        numbered
            .iter()
            .filter(|(_, e)| e.direction == direction)
            .copied()
            .collect::<Vec<_>>()
    };

    writeln!(out)?;
    writeln!(out, "=== Audio Devices ===")?;
    writeln!(out)?;
    print_section(out, "Render", &of(Direction::Render))?;
    writeln!(out)?;
    print_section(out, "Capture", &of(Direction::Capture))?;
    writeln!(out)?;

    writeln!(out, "--- Docked profile ---")?;
    let docked = collect_profile(input, out, &endpoints)?;
    writeln!(out)?;
    writeln!(out, "--- Undocked profile ---")?;
    let undocked = collect_profile(input, out, &endpoints)?;

    save_audio(config_path, &docked, &undocked)?;
    writeln!(out)?;
    writeln!(out, "Audio configuration saved to {}", config_path.display())?;
    Ok(0)
}
