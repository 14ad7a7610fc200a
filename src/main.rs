// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Views and records video from DVR cameras over RTSP.

mod capture;
mod config;
mod cv;
mod error;
mod probe;
mod record;
mod recording;
mod report;

use std::path::PathBuf;

use anyhow::Error;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::EnvStyle;

/// Which DVR channel to use, and where its settings come from.
#[derive(Parser, Clone, Debug, Default)]
pub(crate) struct Source {
    /// Camera channel number; defaults to `IDC` (plain env style) or 1.
    #[arg(long)]
    idc: Option<u32>,

    /// Video file to read from instead of RTSP.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Whether to track human movement (not implemented; ignored).
    #[arg(long)]
    tracking: bool,

    /// Names of the credential environment variables.
    #[arg(long, value_enum, default_value_t)]
    env_style: EnvStyle,

    /// Dotenv-style file to read settings from (default `./.env` if present);
    /// the environment wins.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[derive(Parser)]
enum Cmd {
    /// Shows and records a camera; use Ctrl+C or `q` to stop.
    Record(record::Opts),
    /// Lists the streams a camera offers and exits.
    Probe(probe::Opts),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cmd = Cmd::parse();
    match cmd {
        Cmd::Record(opts) => {
            let stop = capture::Stop::default();
            let on_signal = stop.clone();
            tokio::spawn(async move {
                if capture::watch_signals(on_signal, tokio::signal::ctrl_c).await {
                    tracing::warn!("interrupted again; exiting without finishing the recording");
                    std::process::exit(130);
                }
            });
            // OpenCV windows must live on the main thread.
            tokio::task::block_in_place(|| record::run(opts, stop))
        }
        Cmd::Probe(opts) => probe::run(opts).await,
    }
}
