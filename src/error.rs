// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failure kinds of the capture/record pipeline.
//!
//! Every kind is fatal: callers release what they hold and stop. The kinds are
//! kept distinct so tests (and logs) can tell an exhausted source from a
//! broken encoder.

use std::path::PathBuf;

/// Opaque error raised by a multimedia backend.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} is empty")]
    ConfigurationMissing(String),

    #[error("invalid {var}: {reason}")]
    ConfigurationInvalid { var: String, reason: String },

    #[error("failed to read env file {}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("failed to open video capture {target}")]
    SourceOpen {
        target: String,
        #[source]
        source: Option<BackendError>,
    },

    #[error("failed to read a frame from video capture")]
    FrameRead {
        #[source]
        source: Option<BackendError>,
    },

    #[error("failed to present frame")]
    Display {
        #[source]
        source: BackendError,
    },

    #[error("failed to create video writer {}", path.display())]
    SinkCreate {
        path: PathBuf,
        #[source]
        source: Option<BackendError>,
    },

    #[error("failed to write a frame to video writer")]
    FrameWrite {
        #[source]
        source: Option<BackendError>,
    },

    #[error("failed to release video writer")]
    SinkClose {
        #[source]
        source: BackendError,
    },
}

impl Error {
    pub(crate) fn missing(var: &str) -> Self {
        Error::ConfigurationMissing(var.to_owned())
    }

    pub(crate) fn invalid(var: &str, reason: impl Into<String>) -> Self {
        Error::ConfigurationInvalid {
            var: var.to_owned(),
            reason: reason.into(),
        }
    }
}

#[test]
fn test_missing_message() {
    assert_eq!(Error::missing("DVR_USER").to_string(), "DVR_USER is empty");
}
