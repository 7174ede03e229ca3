//! Node RPC credential discovery.
//!
//! The node writes its RPC user and password into `VRSC.conf`; this module
//! finds that file in the platform-specific data directories and reads the
//! three lines we care about. Environment variables override the file, and
//! an explicit URL (config or flag) overrides everything.

use anyhow::{bail, Result};
use secrecy::SecretString;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:27486/";

const ENV_USER: &str = "VRSC_RPC_USER";
const ENV_PASSWORD: &str = "VRSC_RPC_PASSWORD";
const ENV_URL: &str = "VRSC_RPC_URL";

/// Resolved connection parameters for the node.
pub struct RpcCredentials {
    pub url: String,
    pub user: String,
    pub password: SecretString,
}

impl fmt::Debug for RpcCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcCredentials")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl RpcCredentials {
    /// Resolve credentials: environment first, then the first readable
    /// `VRSC.conf`. `url_override` (from config or CLI) wins over both.
    pub fn discover(url_override: Option<&str>) -> Result<Self> {
        let env_user = std::env::var(ENV_USER).ok().filter(|v| !v.is_empty());
        let env_password = std::env::var(ENV_PASSWORD).ok().filter(|v| !v.is_empty());
        let env_url = std::env::var(ENV_URL).ok().filter(|v| !v.is_empty());

        let conf = read_first_conf();

        let user = env_user.or_else(|| conf.as_ref().and_then(|c| c.user.clone()));
        let password = env_password.or_else(|| conf.as_ref().and_then(|c| c.password.clone()));

        let (Some(user), Some(password)) = (user, password) else {
            bail!(
                "node RPC credentials not found: set {ENV_USER}/{ENV_PASSWORD} \
                 or make a VRSC.conf readable at one of {:?}",
                default_conf_paths()
            );
        };

        let url = url_override
            .map(str::to_string)
            .or(env_url)
            .or_else(|| {
                conf.as_ref()
                    .and_then(|c| c.port)
                    .map(|port| format!("http://127.0.0.1:{port}/"))
            })
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        Ok(Self {
            url,
            user,
            password: SecretString::new(password),
        })
    }
}

/// Default `VRSC.conf` locations: Linux, macOS, Windows.
fn default_conf_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(home) = std::env::var("HOME") {
        let home = PathBuf::from(home);
        paths.push(home.join(".komodo").join("VRSC").join("VRSC.conf"));
        paths.push(
            home.join("Library")
                .join("Application Support")
                .join("Komodo")
                .join("VRSC")
                .join("VRSC.conf"),
        );
    }
    if let Ok(appdata) = std::env::var("APPDATA") {
        paths.push(
            PathBuf::from(appdata)
                .join("Komodo")
                .join("VRSC")
                .join("VRSC.conf"),
        );
    }
    paths
}

#[derive(Debug, Default, PartialEq)]
struct ConfValues {
    user: Option<String>,
    password: Option<String>,
    port: Option<u16>,
}

impl ConfValues {
    fn has_credentials(&self) -> bool {
        self.user.is_some() && self.password.is_some()
    }
}

fn read_first_conf() -> Option<ConfValues> {
    for path in default_conf_paths() {
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        let values = parse_conf(&contents);
        if values.has_credentials() {
            tracing::debug!(path = %path.display(), "loaded node credentials");
            return Some(values);
        }
    }
    None
}

/// Pull `rpcuser=`, `rpcpassword=` and `rpcport=` out of a conf file.
/// The format is `key=value` per line; `#` starts a comment.
fn parse_conf(contents: &str) -> ConfValues {
    let mut values = ConfValues::default();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "rpcuser" => values.user = Some(value.to_string()),
            "rpcpassword" => values.password = Some(value.to_string()),
            "rpcport" => values.port = value.parse().ok(),
            _ => {}
        }
    }
    values
}
