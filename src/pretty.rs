//! Terminal rendering for recommendations and errors.
//!
//! Recommendations come back as markdown (numbered lists, bold titles) and are
//! rendered with `termimad`; failures are printed in bold red with `crossterm`.

use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};
use std::io::{self, Write};
use termimad::MadSkin;

/// Skin used for recommendations.
pub fn skin() -> MadSkin {
    let mut skin = MadSkin::default();
    skin.bold.set_fg(termimad::crossterm::style::Color::Cyan);
    skin
}

/// Render markdown `text` to stdout.
pub fn print_pretty(text: &str) {
    skin().print_text(text);
}

/// Print a readable failure message to stderr.
pub fn print_error(message: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr
        .execute(SetForegroundColor(Color::Red))?
        .execute(SetAttribute(Attribute::Bold))?
        .execute(Print(format!("error: {message}\n")))?
        .execute(SetAttribute(Attribute::Reset))?
        .execute(ResetColor)?;
    stderr.flush()
}

/// Print a dim status line to stderr.
pub fn print_status(message: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr
        .execute(SetAttribute(Attribute::Dim))?
        .execute(Print(format!("{message}\n")))?
        .execute(SetAttribute(Attribute::Reset))?;
    stderr.flush()
}
