// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-frame console status lines.

use std::io::Write;

use crate::capture::FrameInfo;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats `len` bytes with binary (1024) scaling and `decimals` places.
///
/// Values below 1 KB are printed as a plain integer count of bytes.
pub fn len_readable(len: u64, decimals: usize) -> String {
    if len < 1024 {
        return format!("{len}B");
    }
    let mut value = len as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.decimals$}{}", UNITS[unit])
}

/// How the leading timestamp of each line is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Clock {
    /// Local wall-clock `HH:MM:SS`; used for live streams.
    Wall,
    /// No timestamp; used when replaying a file.
    None,
}

impl Clock {
    pub fn for_file(is_file: bool) -> Self {
        if is_file {
            Clock::None
        } else {
            Clock::Wall
        }
    }

    pub fn timestamp(self) -> String {
        match self {
            Clock::Wall => chrono::Local::now().format("%H:%M:%S").to_string(),
            Clock::None => String::new(),
        }
    }
}

/// Writes one status line per frame to `out`.
pub struct Reporter<W> {
    out: W,
    clock: Clock,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, clock: Clock) -> Self {
        Reporter { out, clock }
    }

    pub fn frame(&mut self, info: &FrameInfo) -> std::io::Result<()> {
        writeln!(
            self.out,
            "{} new frame ({}, {}x{}, {})",
            self.clock.timestamp(),
            info.pixel_type,
            info.rows,
            info.cols,
            len_readable(info.bytes, 2),
        )
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
