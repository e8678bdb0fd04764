//! Best-effort lookup of the account that owns a remote profile.
//!
//! The transfer tool stores each profile's OAuth token inline in its config
//! file. The access token is pulled out of that file and exchanged for the
//! account's email address at the provider's identity endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_IDENTITY_ENDPOINT: &str =
    "https://www.googleapis.com/drive/v3/about?fields=user(emailAddress,displayName)";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity lookup is disabled")]
    Disabled,

    #[error("no tool config file to read tokens from")]
    NoConfig,

    #[error("failed to read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote {0} not found in tool config")]
    SectionMissing(String),

    #[error("no token for remote {0}")]
    TokenMissing(String),

    #[error("token for remote {0} is not a balanced JSON object")]
    UnbalancedToken(String),

    #[error("invalid token JSON: {0}")]
    TokenJson(#[from] serde_json::Error),

    #[error("token has an empty access_token")]
    EmptyAccessToken,

    #[error("identity request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("identity response carries no email address")]
    EmptyEmail,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Email address of the account behind `remote`.
    async fn resolve(&self, remote: &str) -> Result<String, IdentityError>;
}

/// Resolver that never finds anyone. Used when there is no real provider.
pub struct NoIdentity;

#[async_trait]
impl IdentityResolver for NoIdentity {
    async fn resolve(&self, _remote: &str) -> Result<String, IdentityError> {
        Err(IdentityError::Disabled)
    }
}

/// Body of the `[name]` section of an INI-style config, without the header.
pub fn find_section<'a>(config: &'a str, name: &str) -> Option<&'a str> {
    let header = format!("[{name}]");
    let mut offset = 0;
    let mut start = None;

    for line in config.split_inclusive('\n') {
        let trimmed = line.trim();
        match start {
            None if trimmed == header => start = Some(offset + line.len()),
            Some(begin) if trimmed.starts_with('[') => return Some(&config[begin..offset]),
            _ => {}
        }
        offset += line.len();
    }

    start.map(|begin| &config[begin..])
}

/// The brace-delimited JSON value of the section's `token` key.
///
/// Braces inside quoted strings, including escaped quotes, do not count
/// toward the balance.
pub fn extract_token_fragment(section: &str) -> Option<&str> {
    let value_start = section.lines().find_map(|line| {
        let (key, _) = line.split_once('=')?;
        (key.trim() == "token").then_some(())?;
        let line_offset = line.as_ptr() as usize - section.as_ptr() as usize;
        let brace = line.find('{')?;
        Some(line_offset + brace)
    })?;

    let candidate = &section[value_start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in candidate.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&candidate[..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

#[derive(Deserialize)]
struct OAuthToken {
    #[serde(default)]
    access_token: String,
}

/// The OAuth access token stored for `remote` in the tool's config text.
pub fn access_token(config: &str, remote: &str) -> Result<String, IdentityError> {
    let section =
        find_section(config, remote).ok_or_else(|| IdentityError::SectionMissing(remote.to_string()))?;

    if !section
        .lines()
        .any(|l| l.split_once('=').is_some_and(|(k, _)| k.trim() == "token"))
    {
        return Err(IdentityError::TokenMissing(remote.to_string()));
    }

    let fragment = extract_token_fragment(section)
        .ok_or_else(|| IdentityError::UnbalancedToken(remote.to_string()))?;
    let token: OAuthToken = serde_json::from_str(fragment)?;

    if token.access_token.is_empty() {
        return Err(IdentityError::EmptyAccessToken);
    }
    Ok(token.access_token)
}

#[derive(Deserialize)]
struct AboutResponse {
    #[serde(default)]
    user: AboutUser,
}

#[derive(Deserialize, Default)]
struct AboutUser {
    #[serde(rename = "emailAddress", default)]
    email_address: String,
}

/// Reads tokens from the tool's config file and asks the identity endpoint
/// who they belong to.
pub struct OAuthIdentityResolver {
    config_path: Option<PathBuf>,
    endpoint: String,
    attempts: u32,
    backoff: Duration,
    client: reqwest::Client,
}

impl OAuthIdentityResolver {
    pub fn new(config_path: Option<PathBuf>, endpoint: String, attempts: u32) -> Self {
        Self {
            config_path,
            endpoint,
            attempts: attempts.max(1),
            backoff: Duration::from_secs(1),
            client: reqwest::Client::new(),
        }
    }

    /// Base delay; attempt `n` waits `n * backoff` before retrying.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Exchange an access token for an email address.
    ///
    /// Only transport errors are retried. An HTTP error status is an answer,
    /// not a hiccup, and is returned at once.
    pub async fn fetch_email(&self, token: &str) -> Result<String, IdentityError> {
        let mut attempt = 1;
        let response = loop {
            let sent = self
                .client
                .get(&self.endpoint)
                .bearer_auth(token)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match sent {
                Ok(response) => break response,
                Err(e) if attempt < self.attempts => {
                    warn!(attempt, error = %e, "Identity request failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(IdentityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let about: AboutResponse = serde_json::from_str(&body)?;
        if about.user.email_address.is_empty() {
            return Err(IdentityError::EmptyEmail);
        }
        Ok(about.user.email_address)
    }
}

#[async_trait]
impl IdentityResolver for OAuthIdentityResolver {
    async fn resolve(&self, remote: &str) -> Result<String, IdentityError> {
        let path = self.config_path.as_ref().ok_or(IdentityError::NoConfig)?;
        let config = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| IdentityError::ConfigRead {
                path: path.clone(),
                source,
            })?;

        let token = access_token(&config, remote)?;
        debug!(remote, "Found access token, querying identity endpoint");
        self.fetch_email(&token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CONFIG: &str = r#"[work]
type = drive
scope = drive
token = {"access_token":"ya29.work","token_type":"Bearer","refresh_token":"1//r","expiry":"2024-01-15T10:00:00Z"}

[personal]
type = drive
client_id = abc
token = {"access_token":"ya29.tricky","meta":{"note":"has } and { and \"quoted {\" text"},"expiry":"2024-01-15T10:00:00Z"}
team_drive =

[nokey]
type = drive
"#;

    #[test]
    fn section_stops_at_next_header() {
        let section = find_section(CONFIG, "work").unwrap();
        assert!(section.contains("ya29.work"));
        assert!(!section.contains("ya29.tricky"));
        assert!(find_section(CONFIG, "missing").is_none());
    }

    #[test]
    fn brace_matching_respects_strings_and_escapes() {
        let section = find_section(CONFIG, "personal").unwrap();
        let fragment = extract_token_fragment(section).unwrap();
        assert!(fragment.starts_with('{'));
        assert!(fragment.ends_with("\"2024-01-15T10:00:00Z\"}"));
        assert_eq!(access_token(CONFIG, "personal").unwrap(), "ya29.tricky");
    }

    #[test]
    fn missing_token_and_unbalanced_token() {
        assert!(matches!(
            access_token(CONFIG, "nokey"),
            Err(IdentityError::TokenMissing(_))
        ));
        assert!(matches!(
            access_token("[x]\ntoken = {\"access_token\":\"a\"\n", "x"),
            Err(IdentityError::UnbalancedToken(_))
        ));
        assert!(matches!(
            access_token(CONFIG, "ghost"),
            Err(IdentityError::SectionMissing(_))
        ));
    }

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_lowercase();
            assert!(request.contains("authorization: bearer ya29.work"));
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/drive/v3/about")
    }

    #[tokio::test]
    async fn resolves_email_from_config() {
        let endpoint = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"user":{"emailAddress":"ops@example.com","displayName":"Ops"}}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rclone.conf");
        std::fs::write(&path, CONFIG).unwrap();

        let resolver = OAuthIdentityResolver::new(Some(path), endpoint, 1);
        assert_eq!(resolver.resolve("work").await.unwrap(), "ops@example.com");
    }

    #[tokio::test]
    async fn error_status_is_not_retried() {
        let endpoint = serve_once("HTTP/1.1 401 Unauthorized", r#"{"error":"expired"}"#).await;
        let resolver = OAuthIdentityResolver::new(None, endpoint, 3);
        let err = resolver.fetch_email("ya29.work").await.unwrap_err();
        assert!(matches!(err, IdentityError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_exhausts_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = OAuthIdentityResolver::new(None, format!("http://{addr}/"), 2)
            .with_backoff(Duration::from_millis(10));
        let err = resolver.fetch_email("ya29.work").await.unwrap_err();
        assert!(matches!(err, IdentityError::Http(_)));
    }

    #[tokio::test]
    async fn missing_config_path() {
        let resolver = OAuthIdentityResolver::new(None, DEFAULT_IDENTITY_ENDPOINT.to_string(), 1);
        assert!(matches!(
            resolver.resolve("work").await,
            Err(IdentityError::NoConfig)
        ));
    }
}
