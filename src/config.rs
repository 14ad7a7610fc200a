// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of DVR connection settings from the environment, an optional
//! dotenv-style file, and command-line flags.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::debug;
use url::Url;

use crate::error::Error;

/// Naming convention of the credential environment variables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EnvStyle {
    /// `DVR_USER`, `DVR_PASSWORD`, `DVR_ADDRESS`, `DVR_PORT`.
    #[default]
    Dvr,
    /// `USER`, `PASSWORD`, `ADDRESS`, `PORT` and optionally `IDC`.
    Plain,
}

impl EnvStyle {
    fn user(self) -> &'static str {
        match self {
            EnvStyle::Dvr => "DVR_USER",
            EnvStyle::Plain => "USER",
        }
    }

    fn password(self) -> &'static str {
        match self {
            EnvStyle::Dvr => "DVR_PASSWORD",
            EnvStyle::Plain => "PASSWORD",
        }
    }

    fn address(self) -> &'static str {
        match self {
            EnvStyle::Dvr => "DVR_ADDRESS",
            EnvStyle::Plain => "ADDRESS",
        }
    }

    fn port(self) -> &'static str {
        match self {
            EnvStyle::Dvr => "DVR_PORT",
            EnvStyle::Plain => "PORT",
        }
    }

    fn idc(self) -> Option<&'static str> {
        match self {
            EnvStyle::Dvr => None,
            EnvStyle::Plain => Some("IDC"),
        }
    }
}

/// Snapshot of environment variables. Values from the process environment
/// take precedence over those loaded from an env file.
#[derive(Clone, Debug, Default)]
pub struct Env {
    vars: HashMap<String, String>,
}

impl Env {
    /// Captures the process environment, layered over `env_file`, or over
    /// `./.env` when no file is given and one exists.
    ///
    /// The process environment itself is never modified.
    pub fn capture(env_file: Option<&Path>) -> Result<Self, Error> {
        let default_file = default_env_file(Path::new("."));
        let mut env = match env_file.or(default_file.as_deref()) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        env.vars.extend(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((OsString::into_string(k).ok()?, v.into_string().ok()?))),
        );
        Ok(env)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let wrap = |source| Error::EnvFile {
            path: path.to_owned(),
            source,
        };
        let mut vars = HashMap::new();
        for item in dotenvy::from_path_iter(path).map_err(wrap)? {
            let (k, v) = item.map_err(wrap)?;
            vars.insert(k, v);
        }
        debug!("loaded {} variables from {}", vars.len(), path.display());
        Ok(Env { vars })
    }

    /// Returns the value of `var`, treating an empty value as absent.
    pub fn get(&self, var: &str) -> Option<&str> {
        self.vars
            .get(var)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn require(&self, var: &str) -> Result<&str, Error> {
        self.get(var).ok_or_else(|| Error::missing(var))
    }
}

/// The `.env` file in `dir`, if there is one.
fn default_env_file(dir: &Path) -> Option<PathBuf> {
    Some(dir.join(".env")).filter(|p| p.is_file())
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Env {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Env {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable connection settings, resolved once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub credentials: Credentials,
    pub address: String,
    pub port: u16,
    pub idc: u32,
    pub file: Option<PathBuf>,

    /// Accepted for compatibility; no tracking is performed.
    pub tracking: bool,
}

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    File(PathBuf),
    Rtsp(Url),
}

impl Config {
    /// Resolves settings from `src` flags and the `env` snapshot.
    ///
    /// All credentials are required even when reading from a file.
    pub(crate) fn resolve(src: &crate::Source, env: &Env) -> Result<Self, Error> {
        let style = src.env_style;
        let user = env.require(style.user())?.to_owned();
        let password = env.require(style.password())?.to_owned();
        let address = env.require(style.address())?.to_owned();
        let port = env.require(style.port())?;
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::invalid(style.port(), format!("{port:?}: {e}")))?;

        let idc = match (src.idc, style.idc().and_then(|var| env.get(var).map(|v| (var, v)))) {
            (Some(idc), _) => idc,
            (None, Some((var, v))) => v
                .parse()
                .map_err(|e| Error::invalid(var, format!("{v:?}: {e}")))?,
            (None, None) => 1,
        };

        Ok(Config {
            credentials: Credentials { user, password },
            address,
            port,
            idc,
            file: src.file.clone().filter(|f| !f.as_os_str().is_empty()),
            tracking: src.tracking,
        })
    }

    /// Builds the DVR stream URL, with credentials embedded.
    pub fn rtsp_url(&self) -> Result<Url, Error> {
        let raw = format!(
            "rtsp://{}:{}/mode=real&idc={}&ids=1",
            self.address, self.port, self.idc
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| Error::invalid("address", format!("{:?}: {e}", self.address)))?;
        url.set_username(&self.credentials.user)
            .and_then(|()| url.set_password(Some(&self.credentials.password)))
            .map_err(|()| Error::invalid("address", "url cannot carry credentials"))?;
        Ok(url)
    }

    pub fn target(&self) -> Result<Target, Error> {
        match &self.file {
            Some(path) => Ok(Target::File(path.clone())),
            None => Ok(Target::Rtsp(self.rtsp_url()?)),
        }
    }
}

impl Target {
    pub fn is_file(&self) -> bool {
        matches!(self, Target::File(_))
    }

    /// String form suitable for logs; RTSP passwords are removed.
    pub fn redacted(&self) -> String {
        match self {
            Target::File(p) => p.display().to_string(),
            Target::Rtsp(url) => {
                let mut url = url.clone();
                let _ = url.set_password(None);
                url.to_string()
            }
        }
    }
}
