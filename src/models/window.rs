use chrono::{DateTime, Utc};
use std::fmt;

use crate::utils::filename::hour_label;
use crate::utils::time::{floor_hour, one_hour};

/// A half-open hourly window `[start, start + 1h)`.
///
/// The window is labelled by its start hour `H`; the map for `H` is built from
/// source data covering `[H - 1h, H)`, see [`ProcessingWindow::source_window`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessingWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ProcessingWindow {
    /// Window for the hour containing `t`.
    pub fn starting_at(t: DateTime<Utc>) -> Self {
        let start = floor_hour(t);
        Self {
            start,
            end: start + one_hour(),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn label(&self) -> String {
        hour_label(self.start)
    }

    /// The window whose data feeds this window's map.
    pub fn source_window(&self) -> Self {
        Self::starting_at(self.start - one_hour())
    }
}

impl fmt::Display for ProcessingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} .. {})",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}
