//! Terminal output for windows, search hits, and source listings

use crate::server::protocol::{SearchResponse, SourceInfo, WindowResponse};
use regex::{Regex, RegexBuilder};
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Stdout with colors when enabled and supported
pub fn stdout(color: bool) -> StandardStream {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

/// Case-insensitive highlighter for a keyword list, None when it is empty
pub fn highlight_regex(keywords: &[String]) -> Option<Regex> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    RegexBuilder::new(&alternatives.join("|"))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Print a window with right-aligned line numbers
pub fn print_window<W: WriteColor>(
    out: &mut W,
    window: &WindowResponse,
    highlight: Option<&Regex>,
) -> io::Result<()> {
    if window.content.is_empty() && window.end_line < window.start_line {
        return Ok(());
    }

    let width = window.end_line.max(1).to_string().len();
    for (offset, line) in window.content.split('\n').enumerate() {
        let line_num = window.start_line + offset as u64;

        out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        write!(out, "{:>width$}", line_num, width = width)?;
        out.reset()?;
        write!(out, ":")?;

        print_highlighted(out, line, highlight)?;
        writeln!(out)?;
    }

    Ok(())
}

/// Print a line with every keyword match highlighted
fn print_highlighted<W: WriteColor>(out: &mut W, line: &str, highlight: Option<&Regex>) -> io::Result<()> {
    let Some(regex) = highlight else {
        return write!(out, "{}", line);
    };

    let mut last = 0;
    for m in regex.find_iter(line) {
        write!(out, "{}", &line[last..m.start()])?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        write!(out, "{}", m.as_str())?;
        out.reset()?;
        last = m.end();
    }
    write!(out, "{}", &line[last..])
}

/// One-line summary of a search
pub fn print_search_result<W: WriteColor>(
    out: &mut W,
    keyword: &str,
    result: &SearchResponse,
) -> io::Result<()> {
    match result.match_line {
        Some(line) => {
            write!(out, "{:?} found at line ", keyword)?;
            out.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true))?;
            write!(out, "{}", line)?;
            out.reset()?;
            writeln!(out, " of {}", result.total_lines)
        }
        None => writeln!(out, "{:?} not found ({} lines)", keyword, result.total_lines),
    }
}

/// Source ids with their sizes
pub fn print_sources<W: WriteColor>(out: &mut W, sources: &[SourceInfo]) -> io::Result<()> {
    for source in sources {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        write!(out, "{}", source.id)?;
        out.reset()?;
        writeln!(out, "  {}", format_size(source.size_bytes))?;
    }
    Ok(())
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
