//! Interaction reports.
//!
//! A report is one flat JSON object whose values are all strings, except for
//! the optional `extra` member which is spliced in raw so scripts can attach
//! their own JSON. The rendered object must fit the cloud publish limit.

use core::fmt::{self, Write};

use heapless::String;
use serde::Serialize;

/// Longest report the publish channel accepts.
pub const MAX_REPORT_LEN: usize = 620;

/// Event name reports are published under.
pub const REPORT_EVENT: &str = "report";

pub type ReportBuffer = String<MAX_REPORT_LEN>;

/// Decimal text of a `u32`.
type Number = String<10>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportError {
    /// The rendered report does not fit in [`MAX_REPORT_LEN`] bytes.
    Overflow,
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Destination for rendered reports.
pub trait ReportSink {
    /// Publishes `payload` under `event`. Returns `false` when the sink is not
    /// connected or refused the payload.
    fn publish(&mut self, event: &str, payload: &str) -> bool;
}

/// Outcome of one interaction, as filled in by a script.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Report<'a> {
    pub play_start_time: &'a str,
    pub player: &'a str,
    pub result: &'a str,
    /// Challenge level; lower is better for most challenges.
    pub level: u32,
    /// Interaction length in milliseconds.
    pub duration: u32,
    pub foodtreat_presented: bool,
    pub foodtreat_eaten: bool,
    /// Raw JSON value appended as the `extra` member.
    pub extra: Option<&'a str>,
}

/// Wire shape of a report. Every member is a JSON string.
#[derive(Serialize)]
struct ReportJson<'a> {
    challenge_id: &'a str,
    play_start_time: &'a str,
    player: &'a str,
    timestamp: &'a str,
    result: &'a str,
    level: &'a str,
    duration: &'a str,
    foodtreat_presented: &'a str,
    foodtreat_eaten: &'a str,
}

impl Report<'_> {
    /// Renders the report with the challenge id and wall-clock `timestamp`
    /// (seconds since the epoch) supplied by the hub.
    ///
    /// # Errors
    ///
    /// [`ReportError::Overflow`] when the report exceeds [`MAX_REPORT_LEN`].
    pub fn render(&self, challenge_id: &str, timestamp: u32) -> Result<ReportBuffer, ReportError> {
        let timestamp = number(timestamp)?;
        let level = number(self.level)?;
        let duration = number(self.duration)?;
        let json = ReportJson {
            challenge_id,
            play_start_time: self.play_start_time,
            player: self.player,
            timestamp: &timestamp,
            result: self.result,
            level: &level,
            duration: &duration,
            foodtreat_presented: flag(self.foodtreat_presented),
            foodtreat_eaten: flag(self.foodtreat_eaten),
        };

        let mut bytes = [0u8; MAX_REPORT_LEN];
        let len =
            serde_json_core::to_slice(&json, &mut bytes).map_err(|_| ReportError::Overflow)?;
        let rendered = core::str::from_utf8(&bytes[..len]).map_err(|_| ReportError::Overflow)?;

        let mut out = ReportBuffer::new();
        match self.extra {
            None => out.push_str(rendered).map_err(|_| ReportError::Overflow)?,
            Some(extra) => {
                // Splice before the closing brace; `extra` is already JSON.
                let body = rendered.strip_suffix('}').unwrap_or(rendered);
                write!(out, "{body},\"extra\":{extra}}}").map_err(|_| ReportError::Overflow)?;
            }
        }
        Ok(out)
    }
}

fn number(value: u32) -> Result<Number, ReportError> {
    let mut text = Number::new();
    write!(text, "{value}").map_err(|_| ReportError::Overflow)?;
    Ok(text)
}

const fn flag(set: bool) -> &'static str {
    if set { "1" } else { "0" }
}
