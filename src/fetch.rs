//! Repository fetching with the `git` CLI.
//!
//! [`GitCliFetcher`] runs `git clone` as a child process that is killed if
//! the fetch future is dropped. Credentials, whether passed explicitly or
//! embedded in the URL as userinfo, reach git as an `Authorization` header
//! through `GIT_CONFIG_*` environment variables. They never appear on the
//! command line, in logs or in error text.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::process::Command;
use url::Url;

use crate::config::RepositoryConfig;

/// Username and access token for an http(s) remote.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

/// Materializes a repository's files into a directory.
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Clone `url` into `destination`, which exists and is empty.
    async fn fetch(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        destination: &Path,
    ) -> Result<()>;
}

/// Fetcher backed by the system `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCliFetcher {
    shallow: bool,
    branch: Option<String>,
}

impl GitCliFetcher {
    pub fn new(shallow: bool, branch: Option<String>) -> Self {
        Self { shallow, branch }
    }

    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(config.shallow, config.branch.clone())
    }
}

#[async_trait]
impl RepositoryFetcher for GitCliFetcher {
    async fn fetch(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
        destination: &Path,
    ) -> Result<()> {
        let (remote, credentials) = clone_target(url, credentials)?;

        let mut cmd = Command::new("git");
        cmd.arg("clone");
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        if let Some(branch) = &self.branch {
            cmd.args(["--branch", branch, "--single-branch"]);
        }
        cmd.arg("--").arg(&remote).arg(destination);
        if let Some(credentials) = &credentials {
            cmd.env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", authorization_header(credentials));
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            url = %remote,
            authenticated = credentials.is_some(),
            destination = %destination.display(),
            "running git clone"
        );
        let output = cmd
            .output()
            .await
            .context("Failed to execute 'git clone'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git clone of {} failed ({}): {}",
                remote,
                output.status,
                redact(stderr.trim(), credentials.as_ref())
            );
        }
        Ok(())
    }
}

/// Split `url` into the address handed to git and the credentials to send
/// with it.
///
/// Userinfo embedded in an http(s) URL is stripped from the address and
/// becomes the credentials unless `credentials` were given explicitly.
/// Explicit credentials for any other scheme are an error rather than
/// silently dropped.
pub fn clone_target(
    url: &str,
    credentials: Option<&Credentials>,
) -> Result<(String, Option<Credentials>)> {
    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) if credentials.is_some() => {
            return Err(anyhow!(e).context(format!("Invalid repository URL: {}", redact_url(url))))
        }
        // scp-style `git@host:path` is not a URL; git resolves it itself
        Err(_) => return Ok((url.to_string(), None)),
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        if credentials.is_some() {
            bail!(
                "Credentials are only supported for http(s) URLs, got scheme '{}'",
                parsed.scheme()
            );
        }
        return Ok((url.to_string(), None));
    }

    let embedded = if parsed.username().is_empty() && parsed.password().is_none() {
        None
    } else {
        let username = urlencoding::decode(parsed.username())
            .context("repository URL username is not valid UTF-8")?
            .into_owned();
        let token = urlencoding::decode(parsed.password().unwrap_or_default())
            .context("repository URL password is not valid UTF-8")?
            .into_owned();
        // A bare `token@host` carries the token in the username slot
        Some(if token.is_empty() {
            Credentials::new("", username)
        } else {
            Credentials::new(username, token)
        })
    };
    parsed
        .set_username("")
        .and_then(|_| parsed.set_password(None))
        .map_err(|_| anyhow!("Cannot strip credentials from {}", redact_url(url)))?;

    Ok((parsed.into(), credentials.cloned().or(embedded)))
}

/// `Authorization: Basic` header for an http(s) remote. An empty username
/// becomes `git`, which the common hosts accept alongside a token.
fn authorization_header(credentials: &Credentials) -> String {
    let username = if credentials.username.is_empty() {
        "git"
    } else {
        credentials.username.as_str()
    };
    let pair = format!("{}:{}", username, credentials.token);
    format!("Authorization: Basic {}", STANDARD.encode(pair))
}

/// `url` with any userinfo masked, for logs and error messages.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.username().is_empty() && parsed.password().is_none() {
                return url.to_string();
            }
            match parsed.set_username("***").and_then(|_| parsed.set_password(None)) {
                Ok(()) => parsed.into(),
                Err(()) => "<redacted url>".to_string(),
            }
        }
        Err(_) => match url.split_once("://") {
            Some((scheme, rest)) => match rest.split_once('@') {
                Some((userinfo, host)) if !userinfo.contains('/') => {
                    format!("{}://***@{}", scheme, host)
                }
                _ => url.to_string(),
            },
            None => url.to_string(),
        },
    }
}

/// Replace every form of the token that git may echo back.
fn redact(text: &str, credentials: Option<&Credentials>) -> String {
    let Some(credentials) = credentials.filter(|c| !c.token.is_empty()) else {
        return text.to_string();
    };
    let mut out = text.replace(&credentials.token, "***");
    let encoded = urlencoding::encode(&credentials.token);
    if encoded != credentials.token {
        out = out.replace(encoded.as_ref(), "***");
    }
    out
}
