//! NSE reports API archive source.
//!
//! Fetches the daily "Full Bhavcopy and Security Deliverable data" zip from
//! the NSE reports endpoint. The endpoint sometimes answers with the zip
//! directly and sometimes with a JSON list pointing at it; both are handled.
//! NSE rejects clients without a session cookie, so the home page is hit
//! first and then again every `cookie_refresh_secs`.
//!
//! The endpoint is undocumented and throttles aggressively. HTTP 403 means the
//! client IP has been blocked and trips the circuit breaker.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::PipelineError;
use crate::source::{AbsentStatuses, ArchiveSource};
use chrono::NaiveDate;
use reqwest::blocking::{Client, Response};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const ARCHIVE_DESCRIPTOR: &str = r#"[{"name":"Full Bhavcopy and Security Deliverable data","type":"daily-reports","category":"capital-market","section":"equities"}]"#;

/// Connection settings for the NSE endpoint (`[fetch]` in the config file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NseSourceConfig {
    pub base_url: String,
    pub home_url: String,
    pub referer: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub cookie_refresh_secs: u64,
    /// Statuses meaning "no bulletin for this date" (holiday-equivalent skip).
    pub absent_statuses: Vec<u16>,
}

impl Default for NseSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.nseindia.com/api/reports".into(),
            home_url: "https://www.nseindia.com".into(),
            referer: "https://www.nseindia.com/report-detail/eq_security".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .into(),
            timeout_secs: 30,
            cookie_refresh_secs: 300,
            absent_statuses: vec![404],
        }
    }
}

/// Legacy JSON response form: a list of report entries, one of which links the zip.
#[derive(Debug, Deserialize)]
struct ReportEntry {
    file: Option<String>,
}

/// Which request a response status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    /// The dated reports query; absent statuses mean "no bulletin".
    Report,
    /// A zip the report response pointed at.
    ListedZip,
}

pub struct NseArchiveSource {
    client: Client,
    config: NseSourceConfig,
    absent: AbsentStatuses,
    circuit_breaker: Arc<CircuitBreaker>,
    last_cookie: Mutex<Option<Instant>>,
}

impl NseArchiveSource {
    pub fn new(
        config: NseSourceConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PipelineError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        let referer = HeaderValue::from_str(&config.referer)
            .map_err(|e| PipelineError::TransientFetch(format!("invalid referer header: {e}")))?;
        headers.insert(header::REFERER, referer);

        let client = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| {
                PipelineError::TransientFetch(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            absent: AbsentStatuses::new(config.absent_statuses.iter().copied()),
            config,
            circuit_breaker,
            last_cookie: Mutex::new(None),
        })
    }

    /// Reports API URL for a date: `{base}?archives={descriptor}&date=DD-Mon-YYYY&type=Archives`.
    pub fn archive_url(base_url: &str, date: NaiveDate) -> String {
        format!(
            "{base_url}?archives={}&date={}&type=Archives",
            urlencoding::encode(ARCHIVE_DESCRIPTOR),
            date.format("%d-%b-%Y")
        )
    }

    /// Hit the home page for a session cookie if the last one is stale.
    /// Failure is logged and ignored; the report request will tell.
    fn refresh_cookie_if_needed(&self) {
        let mut last = self
            .last_cookie
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let refresh = Duration::from_secs(self.config.cookie_refresh_secs);
        if matches!(*last, Some(at) if at.elapsed() < refresh) {
            return;
        }
        match self.client.get(&self.config.home_url).send() {
            Ok(resp) if resp.status().is_success() => debug!("refreshed NSE session cookie"),
            Ok(resp) => warn!(status = %resp.status(), "session cookie request rejected"),
            Err(e) => warn!(error = %e, "could not get session cookie"),
        }
        *last = Some(Instant::now());
    }

    fn send(&self, url: &str, request: Request) -> Result<Response, PipelineError> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| PipelineError::TransientFetch(describe_reqwest_error(&e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            warn!(url, "HTTP 403 from archive endpoint, circuit breaker tripped");
            return Err(PipelineError::CircuitOpen);
        }
        if !status.is_success() {
            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
            }
            return Err(match request {
                Request::Report => self.absent.classify(status.as_u16(), url),
                // The report listed this zip, so a missing download is a real failure.
                Request::ListedZip => PipelineError::HttpStatus {
                    status: status.as_u16(),
                    message: format!("zip download HTTP {} from {url}", status.as_u16()),
                },
            });
        }
        Ok(resp)
    }

    /// Resolve the zip link in a legacy JSON response.
    fn zip_link(&self, body: &[u8]) -> Result<String, PipelineError> {
        let entries: Vec<ReportEntry> = serde_json::from_slice(body).map_err(|_| {
            PipelineError::Integrity("invalid response format (not JSON or ZIP)".into())
        })?;
        if entries.is_empty() {
            return Err(PipelineError::Integrity("no data in response".into()));
        }
        let file = entries
            .into_iter()
            .filter_map(|e| e.file)
            .find(|f| f.ends_with(".zip"))
            .ok_or_else(|| PipelineError::Integrity("no zip file in response".into()))?;
        if file.starts_with("http://") || file.starts_with("https://") {
            Ok(file)
        } else {
            Ok(format!("{}{file}", self.config.home_url.trim_end_matches('/')))
        }
    }
}

impl ArchiveSource for NseArchiveSource {
    fn name(&self) -> &str {
        "nse_reports_api"
    }

    fn fetch(&self, date: NaiveDate) -> Result<Vec<u8>, PipelineError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(PipelineError::CircuitOpen);
        }
        self.refresh_cookie_if_needed();

        let url = Self::archive_url(&self.config.base_url, date);
        let resp = self.send(&url, Request::Report)?;
        let is_zip_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/zip"));
        let body = resp
            .bytes()
            .map_err(|e| PipelineError::TransientFetch(describe_reqwest_error(&e)))?;

        let payload = if is_zip_type || body.starts_with(b"PK") {
            body.to_vec()
        } else {
            let link = self.zip_link(&body)?;
            debug!(%date, link, "following zip link from JSON response");
            self.send(&link, Request::ListedZip)?
                .bytes()
                .map_err(|e| PipelineError::TransientFetch(describe_reqwest_error(&e)))?
                .to_vec()
        };

        self.circuit_breaker.record_success();
        Ok(payload)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timeout: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        format!("network error: {e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_url_is_derived_from_date() {
        let date = NaiveDate::from_ymd_opt(2025, 2, 12).unwrap();
        let url = NseArchiveSource::archive_url("https://www.nseindia.com/api/reports", date);
        assert!(url.starts_with("https://www.nseindia.com/api/reports?archives=%5B%7B%22name%22"));
        assert!(url.ends_with("&date=12-Feb-2025&type=Archives"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn zip_link_resolution() {
        let source = NseArchiveSource::new(
            NseSourceConfig::default(),
            Arc::new(CircuitBreaker::for_archive()),
        )
        .unwrap();

        let link = source
            .zip_link(br#"[{"name":"x"},{"file":"/content/historical/bhav.zip"}]"#)
            .unwrap();
        assert_eq!(link, "https://www.nseindia.com/content/historical/bhav.zip");

        assert_eq!(source.zip_link(b"[]").unwrap_err().kind(), "integrity");
        assert_eq!(
            source.zip_link(br#"[{"file":"/a.csv"}]"#).unwrap_err(),
            PipelineError::Integrity("no zip file in response".into())
        );
        assert_eq!(source.zip_link(b"<html>").unwrap_err().kind(), "integrity");
    }

    /// Minimal HTTP/1.1 responder: `route(path) -> (status line, content type, body)`.
    fn serve(route: fn(&str) -> (&'static str, &'static str, Vec<u8>)) -> String {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() > 2 {
                    line.clear();
                }
                let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, content_type, body) = route(&path);
                write!(
                    stream,
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .unwrap();
                stream.write_all(&body).unwrap();
            }
        });
        format!("http://{addr}")
    }

    fn source_for(base: &str) -> NseArchiveSource {
        let config = NseSourceConfig {
            base_url: format!("{base}/api/reports"),
            home_url: base.to_string(),
            timeout_secs: 5,
            ..NseSourceConfig::default()
        };
        NseArchiveSource::new(config, Arc::new(CircuitBreaker::for_archive())).unwrap()
    }

    #[test]
    fn missing_listed_zip_is_a_hard_failure() {
        let base = serve(|path| {
            if path.starts_with("/api/reports") {
                (
                    "200 OK",
                    "application/json",
                    br#"[{"file":"/content/x.zip"}]"#.to_vec(),
                )
            } else if path == "/content/x.zip" {
                ("404 Not Found", "text/plain", b"gone".to_vec())
            } else {
                ("200 OK", "text/html", b"home".to_vec())
            }
        });
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();

        let err = source_for(&base).fetch(date).unwrap_err();
        match err {
            PipelineError::HttpStatus { status, ref message } => {
                assert_eq!(status, 404);
                assert!(message.contains("zip download"));
            }
            other => panic!("expected http_status failure, got {other:?}"),
        }
    }

    #[test]
    fn absent_report_is_a_skip() {
        let base = serve(|path| {
            if path.starts_with("/api/reports") {
                ("404 Not Found", "text/plain", b"no data".to_vec())
            } else {
                ("200 OK", "text/html", b"home".to_vec())
            }
        });
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();

        assert_eq!(
            source_for(&base).fetch(date),
            Err(PipelineError::ResourceAbsent { status: 404 })
        );
    }

    #[test]
    fn listed_zip_is_followed() {
        let base = serve(|path| {
            if path.starts_with("/api/reports") {
                (
                    "200 OK",
                    "application/json",
                    br#"[{"file":"/content/x.zip"}]"#.to_vec(),
                )
            } else if path == "/content/x.zip" {
                ("200 OK", "application/zip", b"PK\x03\x04zipbytes".to_vec())
            } else {
                ("200 OK", "text/html", b"home".to_vec())
            }
        });
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();

        let payload = source_for(&base).fetch(date).unwrap();
        assert!(payload.starts_with(b"PK"));
    }

    #[test]
    fn open_breaker_refuses_without_network() {
        let breaker = Arc::new(CircuitBreaker::for_archive());
        breaker.trip();
        let source = NseArchiveSource::new(NseSourceConfig::default(), breaker).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
        assert_eq!(source.fetch(date), Err(PipelineError::CircuitOpen));
        assert!(!source.is_available());
    }
}
