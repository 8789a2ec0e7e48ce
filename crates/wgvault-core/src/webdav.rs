//! WebDAV implementation of the [`RemoteStore`] capability.
//!
//! Speaks just enough of RFC 4918 for a blob store: GET/PUT for blobs,
//! MKCOL for the two collection prefixes, PROPFIND depth 1 for listings
//! (with `getlastmodified`), and HEAD for a single blob's modification time.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, CONTENT_TYPE, LAST_MODIFIED};
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::remote::{RemoteEntry, RemoteError, RemoteStore};
use crate::settings::WebDavSettings;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:getlastmodified/></d:prop></d:propfind>"#;

#[derive(Debug, Error)]
pub enum WebDavError {
    #[error("webdav server url is not configured")]
    MissingUrl,

    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// A configured WebDAV endpoint. Credentials are passed through unchanged
/// as HTTP basic auth; every request carries the configured timeout.
pub struct WebDavClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl WebDavClient {
    pub fn new(settings: &WebDavSettings) -> Result<Self, WebDavError> {
        if settings.server_url.trim().is_empty() {
            return Err(WebDavError::MissingUrl);
        }
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: settings.server_url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn url_for(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url_for(path))
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Cheap reachability + credential check: PROPFIND depth 0 on the base.
    #[tracing::instrument(skip(self))]
    pub async fn test_connection(&self) -> Result<(), RemoteError> {
        let resp = self
            .request(Method::from_bytes(b"PROPFIND").unwrap(), "")
            .header("Depth", "0")
            .header(CONTENT_TYPE, HeaderValue::from_static("application/xml"))
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(transport)?;
        check_status(resp.status())?;
        debug!("webdav connection ok");
        Ok(())
    }
}

impl RemoteStore for WebDavClient {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let resp = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                check_status(status)?;
                let bytes = resp.bytes().await.map_err(transport)?;
                Ok(Some(bytes.to_vec()))
            }
        }
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        let resp = self
            .request(Method::PUT, path)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport)?;
        check_status(resp.status())?;
        debug!(path, len = bytes.len(), "uploaded blob");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let resp = self
            .request(Method::from_bytes(b"PROPFIND").unwrap(), prefix)
            .header("Depth", "1")
            .header(CONTENT_TYPE, HeaderValue::from_static("application/xml"))
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status => {
                check_status(status)?;
                let body = resp.text().await.map_err(transport)?;
                Ok(parse_multistatus(&body))
            }
        }
    }

    async fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>, RemoteError> {
        let resp = self
            .request(Method::HEAD, path)
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                check_status(status)?;
                Ok(resp
                    .headers()
                    .get(LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_http_date))
            }
        }
    }

    async fn ensure_dir(&self, prefix: &str) -> Result<(), RemoteError> {
        let resp = self
            .request(Method::from_bytes(b"MKCOL").unwrap(), prefix)
            .send()
            .await
            .map_err(transport)?;
        match resp.status().as_u16() {
            // 405 means the collection already exists.
            405 => Ok(()),
            _ => check_status(resp.status()),
        }
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Unavailable(e.to_string())
    }
}

fn check_status(status: StatusCode) -> Result<(), RemoteError> {
    match status.as_u16() {
        200..=299 => Ok(()),
        401 | 403 => Err(RemoteError::Auth),
        code => Err(RemoteError::Status {
            status: code,
            body: status.canonical_reason().unwrap_or("").to_string(),
        }),
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Pull `(name, getlastmodified)` pairs out of a PROPFIND multistatus body.
/// Namespace prefixes vary between servers, so tags are matched on their
/// local name. The collection's own row and non-record entries are dropped.
fn parse_multistatus(xml: &str) -> Vec<RemoteEntry> {
    let mut entries = Vec::new();
    for block in extract_elements(xml, "response") {
        let Some(href) = extract_elements(block, "href").into_iter().next() else {
            warn!("multistatus response without href");
            continue;
        };
        let Some(name) = href.trim().trim_end_matches('/').rsplit('/').next() else {
            continue;
        };
        if !name.ends_with(".json") {
            continue;
        }
        let last_modified = extract_elements(block, "getlastmodified")
            .into_iter()
            .next()
            .and_then(parse_http_date);
        entries.push(RemoteEntry {
            name: name.to_string(),
            last_modified,
        });
    }
    entries
}

/// Inner text of every element whose local tag name matches, at any depth.
fn extract_elements<'a>(xml: &'a str, local: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        if after.starts_with('/') || after.starts_with('?') || after.starts_with('!') {
            rest = after;
            continue;
        }
        let name_end = after
            .find(|c: char| c == '>' || c == '/' || c.is_ascii_whitespace())
            .unwrap_or(after.len());
        let full_name = &after[..name_end];
        let local_name = full_name.rsplit(':').next().unwrap_or(full_name);
        if !local_name.eq_ignore_ascii_case(local) {
            rest = after;
            continue;
        }
        let Some(open_end) = after.find('>') else {
            break;
        };
        if after[..open_end].ends_with('/') {
            out.push("");
            rest = &after[open_end + 1..];
            continue;
        }
        let content = &after[open_end + 1..];
        let close = format!("</{full_name}>");
        let Some(close_at) = content.find(&close) else {
            rest = after;
            continue;
        };
        out.push(&content[..close_at]);
        rest = &content[close_at + close.len()..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const MULTISTATUS: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote.php/dav/files/u/wgvault/servers/</d:href>
    <d:propstat>
      <d:prop><d:getlastmodified>Mon, 03 Jun 2024 10:00:00 GMT</d:getlastmodified></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/u/wgvault/servers/srv1.json</d:href>
    <d:propstat>
      <d:prop><d:getlastmodified>Tue, 04 Jun 2024 11:30:05 GMT</d:getlastmodified></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <D:response xmlns:D="DAV:">
    <D:href>/remote.php/dav/files/u/wgvault/servers/srv2.json</D:href>
    <D:propstat>
      <D:prop><D:getlastmodified/></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</d:multistatus>"#;

    #[test]
    fn listing_skips_collection_row() {
        let entries = parse_multistatus(MULTISTATUS);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "srv1.json");
        assert_eq!(
            entries[0].last_modified,
            Some("2024-06-04T11:30:05Z".parse().unwrap())
        );
        assert_eq!(entries[1].name, "srv2.json");
        assert_eq!(entries[1].last_modified, None);
    }

    #[test]
    fn http_date_parses_to_utc() {
        let parsed = parse_http_date("Tue, 15 Nov 1994 12:45:26 GMT").unwrap();
        assert_eq!(parsed, "1994-11-15T12:45:26Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test_case("", "servers", "https://dav.example.com/store/servers" ; "plain join")]
    #[test_case("/", "servers/a.json", "https://dav.example.com/store/servers/a.json" ; "leading slash stripped")]
    #[test_case("", "", "https://dav.example.com/store" ; "empty path is base")]
    fn urls_join_cleanly(extra: &str, path: &str, expected: &str) {
        let settings = WebDavSettings {
            server_url: format!("https://dav.example.com/store{extra}"),
            ..WebDavSettings::default()
        };
        let client = WebDavClient::new(&settings).unwrap();
        assert_eq!(client.url_for(path), expected);
    }

    #[test]
    fn missing_url_rejected() {
        let settings = WebDavSettings::default();
        assert!(matches!(
            WebDavClient::new(&settings),
            Err(WebDavError::MissingUrl)
        ));
    }

    #[test_case(200, true ; "ok")]
    #[test_case(204, true ; "no content")]
    #[test_case(401, false ; "unauthorized")]
    #[test_case(500, false ; "server error")]
    fn status_mapping(code: u16, ok: bool) {
        let result = check_status(StatusCode::from_u16(code).unwrap());
        assert_eq!(result.is_ok(), ok);
        if code == 401 {
            assert!(matches!(result, Err(RemoteError::Auth)));
        }
    }
}
