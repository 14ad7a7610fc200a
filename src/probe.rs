// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lists the streams a DVR channel offers, without recording anything.

use anyhow::{bail, Context, Error};
use clap::Parser;
use retina::codec::ParametersRef;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::config::{Config, Env, Target};

#[derive(Parser)]
pub struct Opts {
    #[command(flatten)]
    src: super::Source,

    /// Print the stream list as JSON.
    #[arg(long)]
    json: bool,

    /// Seconds to wait for the DESCRIBE response.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct StreamInfo {
    media: String,
    encoding: String,
    codec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

impl StreamInfo {
    fn from_stream(s: &retina::client::Stream) -> Self {
        let mut info = StreamInfo {
            media: s.media().to_owned(),
            encoding: s.encoding_name().to_owned(),
            codec: None,
            width: None,
            height: None,
        };
        match s.parameters() {
            Some(ParametersRef::Video(v)) => {
                let (w, h) = v.pixel_dimensions();
                info.codec = Some(v.rfc6381_codec().to_owned());
                info.width = Some(w);
                info.height = Some(h);
            }
            Some(ParametersRef::Audio(a)) => {
                info.codec = a.rfc6381_codec().map(str::to_owned);
            }
            _ => {}
        }
        info
    }
}

impl std::fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.media, self.encoding)?;
        if let Some(codec) = &self.codec {
            write!(f, " ({codec})")?;
        }
        if let (Some(w), Some(h)) = (self.width, self.height) {
            write!(f, " {w}x{h}")?;
        }
        Ok(())
    }
}

/// `retina` takes credentials separately from the URL.
fn split_creds(config: &Config) -> Result<(Url, retina::client::Credentials), Error> {
    let mut bare = config.rtsp_url()?;
    let _ = bare.set_password(None);
    let _ = bare.set_username("");
    let creds = retina::client::Credentials {
        username: config.credentials.user.clone(),
        password: config.credentials.password.clone(),
    };
    Ok((bare, creds))
}

pub async fn run(opts: Opts) -> Result<(), Error> {
    let env = Env::capture(opts.src.env_file.as_deref())?;
    let config = Config::resolve(&opts.src, &env)?;
    if let Target::File(_) = config.target()? {
        bail!("probe only works with RTSP sources; drop --file");
    }
    let (bare, creds) = split_creds(&config)?;
    info!("describing {}", bare);
    let session = tokio::time::timeout(
        std::time::Duration::from_secs(opts.timeout),
        retina::client::Session::describe(
            bare.clone(),
            retina::client::SessionOptions::default()
                .creds(Some(creds))
                .user_agent("dvr-record probe".to_owned()),
        ),
    )
    .await
    .with_context(|| format!("no DESCRIBE response within {} seconds", opts.timeout))?
    .with_context(|| format!("DESCRIBE of {bare} failed"))?;

    let streams: Vec<_> = session.streams().iter().map(StreamInfo::from_stream).collect();
    if opts.json {
        println!("{}", serde_json::to_string_pretty(&streams)?);
    } else {
        for (i, s) in streams.iter().enumerate() {
            println!("{i}: {s}");
        }
    }
    Ok(())
}

#[test]
fn test_split_creds() {
    let config = Config {
        credentials: crate::config::Credentials {
            user: "admin".to_owned(),
            password: "p@ss:w+rd".to_owned(),
        },
        address: "10.0.0.2".to_owned(),
        port: 554,
        idc: 3,
        file: None,
        tracking: false,
    };
    let (bare, creds) = split_creds(&config).unwrap();
    assert_eq!(bare.as_str(), "rtsp://10.0.0.2:554/mode=real&idc=3&ids=1");
    assert_eq!(creds.username, "admin");
    assert_eq!(creds.password, "p@ss:w+rd");
}

#[test]
fn test_stream_line() {
    let s = StreamInfo {
        media: "video".to_owned(),
        encoding: "h264".to_owned(),
        codec: Some("avc1.640028".to_owned()),
        width: Some(1920),
        height: Some(1080),
    };
    assert_eq!(s.to_string(), "video h264 (avc1.640028) 1920x1080");
}
