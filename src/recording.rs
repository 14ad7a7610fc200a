// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Where recordings go and what is written alongside them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capture::Dimensions;
use crate::error::Error;

/// How output files are named.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Naming {
    /// `idc{idc}_{uuid}.mkv`; never collides with earlier runs.
    #[default]
    Uuid,
    /// `cam_{idc}.mkv`
    Camera,
    /// `{idc}.mkv`
    Plain,
}

impl Naming {
    pub fn file_name(self, idc: u32) -> String {
        match self {
            Naming::Uuid => format!("idc{idc}_{}.mkv", uuid::Uuid::new_v4()),
            Naming::Camera => format!("cam_{idc}.mkv"),
            Naming::Plain => format!("{idc}.mkv"),
        }
    }
}

/// Creates `dir` (and parents) if needed and returns the path of a new
/// recording within it.
pub fn prepare(dir: &Path, naming: Naming, idc: u32) -> Result<PathBuf, Error> {
    std::fs::create_dir_all(dir).map_err(|e| Error::SinkCreate {
        path: dir.to_owned(),
        source: Some(Box::new(e)),
    })?;
    Ok(dir.join(naming.file_name(idc)))
}

/// Path of the JSON metadata written next to `recording`.
pub fn sidecar_path(recording: &Path) -> PathBuf {
    let mut name = recording.as_os_str().to_owned();
    name.push(".json");
    name.into()
}

/// Metadata describing a finished recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub idc: u32,
    /// `file` or `rtsp`
    pub source_kind: String,
    /// Source location with any password removed.
    pub source: String,
    pub started: chrono::DateTime<chrono::Local>,
    pub finished: Option<chrono::DateTime<chrono::Local>>,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub fourcc: String,
    pub frames: u64,
}

impl RecordingInfo {
    pub fn new(
        idc: u32,
        target: &crate::config::Target,
        dims: Dimensions,
        fps: f64,
        fourcc: &str,
    ) -> Self {
        RecordingInfo {
            idc,
            source_kind: if target.is_file() { "file" } else { "rtsp" }.to_owned(),
            source: target.redacted(),
            started: chrono::Local::now(),
            finished: None,
            width: dims.width,
            height: dims.height,
            fps,
            fourcc: fourcc.to_owned(),
            frames: 0,
        }
    }

    pub fn write(&self, recording: &Path) -> std::io::Result<()> {
        let buf = serde_json::to_vec_pretty(self)?;
        std::fs::write(sidecar_path(recording), buf)
    }
}
