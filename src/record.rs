// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Views and records a DVR channel (or a local video file).

use std::path::PathBuf;

use anyhow::{Context, Error};
use clap::Parser;
use tracing::{info, warn};

use crate::capture::{self, Headless, Passthrough, Stop};
use crate::config::{Config, Env};
use crate::cv;
use crate::recording::Naming;
use crate::report::{Clock, Reporter};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum FilterKind {
    #[default]
    None,
    /// Show a blurred grayscale image; the original is still recorded.
    GrayBlur,
}

#[derive(Parser)]
pub struct Opts {
    #[command(flatten)]
    src: super::Source,

    /// Directory to write recordings into; created if missing.
    #[arg(long, default_value = "recordings")]
    out_dir: PathBuf,

    /// Recording file naming scheme.
    #[arg(long, value_enum, default_value_t)]
    naming: Naming,

    /// Four-character code of the output codec.
    #[arg(long, default_value = "X264", value_parser = parse_fourcc)]
    fourcc: [u8; 4],

    /// Frame rate written into the output file, regardless of the input rate.
    #[arg(long, default_value_t = 15.0, value_parser = parse_fps)]
    fps: f64,

    /// Transform applied to displayed frames.
    #[arg(long, value_enum, default_value_t)]
    filter: FilterKind,

    /// Kernel size of the `gray-blur` filter.
    #[arg(long, default_value_t = 25)]
    blur_kernel: u32,

    /// Don't open a display window.
    #[arg(long)]
    no_window: bool,

    /// Duration after which to stop automatically, in seconds.
    #[arg(long, name = "secs")]
    duration: Option<u64>,
}

fn parse_fourcc(s: &str) -> Result<[u8; 4], String> {
    <[u8; 4]>::try_from(s.as_bytes())
        .ok()
        .filter(|b| b.iter().all(u8::is_ascii_graphic))
        .ok_or_else(|| format!("expected four printable ASCII characters, got {s:?}"))
}

fn parse_fps(s: &str) -> Result<f64, String> {
    let fps: f64 = s.parse().map_err(|e| format!("{s:?}: {e}"))?;
    if fps.is_finite() && fps > 0.0 {
        Ok(fps)
    } else {
        Err(format!("expected a positive frame rate, got {s:?}"))
    }
}

pub fn run(opts: Opts, stop: Stop) -> Result<(), Error> {
    let env = Env::capture(opts.src.env_file.as_deref())?;
    let config = Config::resolve(&opts.src, &env)?;
    if config.tracking {
        warn!("--tracking is accepted but has no effect");
    }
    let target = config.target()?;

    let mut source = cv::Source::open(&target)?;
    let mut display = if opts.no_window {
        cv::Display::Headless(Headless)
    } else {
        cv::Display::Window(cv::Window::open(format!("video capture {}", config.idc))?)
    };
    let mut filter = match opts.filter {
        FilterKind::None => cv::Filter::None(Passthrough),
        FilterKind::GrayBlur => cv::Filter::GrayBlur(cv::GrayBlur::new(opts.blur_kernel)),
    };
    let mut opener = cv::WriterOpener::new(
        cv::WriterOpts {
            dir: opts.out_dir,
            naming: opts.naming,
            idc: config.idc,
            fourcc: opts.fourcc,
            fps: opts.fps,
        },
        target.clone(),
    );
    let mut reporter = Reporter::new(std::io::stdout().lock(), Clock::for_file(target.is_file()));
    let stop = stop.after(opts.duration.map(std::time::Duration::from_secs));

    let recorded = capture::run(
        &mut source,
        &mut filter,
        &mut display,
        &mut opener,
        &mut reporter,
        &stop,
    )
    .with_context(|| format!("recording {} failed", target.redacted()))?;
    info!(
        "stopped ({:?}) after {} frames of {}x{}",
        recorded.reason, recorded.frames, recorded.dimensions.width, recorded.dimensions.height
    );
    Ok(())
}

#[test]
fn test_parse_fourcc() {
    assert_eq!(parse_fourcc("X264"), Ok(*b"X264"));
    assert_eq!(parse_fourcc("MJPG"), Ok(*b"MJPG"));
    assert!(parse_fourcc("H26").is_err());
    assert!(parse_fourcc("H 64").is_err());
}

#[test]
fn test_parse_fps() {
    assert_eq!(parse_fps("15"), Ok(15.0));
    assert_eq!(parse_fps("7.5"), Ok(7.5));
    assert!(parse_fps("0").is_err());
    assert!(parse_fps("-10").is_err());
    assert!(parse_fps("NaN").is_err());
    assert!(parse_fps("inf").is_err());
    assert!(parse_fps("fast").is_err());
}
