use crate::auth::{self, BasicAuth};
use crate::hosts::{self, HostStore, WakeRequest};
use crate::metrics;
use crate::probe::HostProbe;
use crate::ratelimit::{Action, RateLimits};
use crate::session::{Sessions, SESSION_COOKIE, SESSION_TIMEOUT};
use crate::wol;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use rouille::Request;
use rouille::Response;
use serde::Serialize;
use serde_json::json;
use std::io;
use std::io::Read;
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

const CSRF_HEADER: &str = "X-CSRF-TOKEN";
const MAX_HOST_LEN: usize = 253;

lazy_static! {
    static ref HOST_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9.\-:]+$").unwrap();
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Wake(#[from] wol::Error),
    #[error(transparent)]
    Hosts(#[from] hosts::Error),
    #[error("Parameter host not set.")]
    MissingHost,
    #[error("Invalid host parameter.")]
    InvalidHost,
    #[error("Invalid value for aop!")]
    UnknownOperation,
    #[error("Too many requests. Please try again later.")]
    RateLimited,
    #[error("CSRF token validation failed.")]
    BadCsrfToken,
    #[error("Cannot read request body: {0}")]
    Body(#[from] io::Error),
    #[error("Invalid wake request: {0}")]
    InvalidWakeRequest(#[source] serde_json::Error),
    #[error("Cannot convert response data to JSON.")]
    Json(#[from] serde_json::Error),
    #[error("Cannot format download timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

impl From<Error> for Response {
    fn from(e: Error) -> Self {
        match e {
            Error::RateLimited => Response::text(e.to_string()).with_status_code(429),
            Error::BadCsrfToken => Response::text(e.to_string()).with_status_code(403),
            _ => Response::text(format!("Internal Server Error! {}", escape_html(&e.to_string())))
                .with_status_code(500),
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

/// Hostnames, IPv4 and IPv6 literals only, so the status check cannot be
/// pointed at URLs or arbitrary strings.
pub fn is_allowed_host(host: &str) -> bool {
    host.len() <= MAX_HOST_LEN && HOST_PATTERN.is_match(host)
}

fn json_response<T: Serialize>(data: &T, filename: Option<&str>) -> Result<Response, Error> {
    let body = serde_json::to_string_pretty(data)?;
    let mut resp = Response::from_data("application/json", body)
        .with_no_cache()
        .with_additional_header("X-Content-Type-Options", "nosniff")
        .with_additional_header("X-Frame-Options", "DENY")
        .with_additional_header("X-XSS-Protection", "1; mode=block");
    if let Some(filename) = filename {
        let safe: String = filename
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        resp = resp.with_additional_header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", safe),
        );
    }
    Ok(resp)
}

fn read_body(request: &Request) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    if let Some(mut data) = request.data() {
        data.read_to_end(&mut body)?;
    }
    Ok(body)
}

// A body that is not JSON at all carries no fields, and the sender then
// reports the missing MAC. A field of the wrong type is reported as such.
fn parse_wake_request(body: &[u8]) -> Result<WakeRequest, Error> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => serde_json::from_value(value).map_err(Error::InvalidWakeRequest),
        Err(_) => Ok(WakeRequest::default()),
    }
}

// Leading integer, non-zero means on: "1", "2" and "3x" enable it, "0" and
// "no" do not. "true" is accepted as well.
fn debug_enabled(value: &str) -> bool {
    let value = value.trim_start();
    if value.eq_ignore_ascii_case("true") {
        return true;
    }
    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    digits
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .any(|c| c != '0')
}

fn download_filename() -> Result<String, Error> {
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!("[year][month][day]-[hour][minute][second]"))?;
    Ok(format!("wake-on-lan-{}.json", stamp))
}

pub struct Server {
    store: HostStore,
    sessions: Sessions,
    sender: wol::Sender,
    probe: HostProbe,
    auth: Option<BasicAuth>,
}

impl Server {
    pub fn new(
        store: HostStore,
        limits: RateLimits,
        sender: wol::Sender,
        probe: HostProbe,
        auth: Option<BasicAuth>,
    ) -> Self {
        Self {
            store,
            sessions: Sessions::new(limits),
            sender,
            probe,
            auth,
        }
    }

    pub fn handle(&self, request: &Request) -> Response {
        let resp = self.route(request);
        // GET /?aop=HOST.CHECK&host=pc.lan 200
        info!(
            "{method} {request} {status}",
            method = request.method(),
            request = request.raw_url(),
            status = resp.status_code,
        );
        resp
    }

    fn route(&self, request: &Request) -> Response {
        if let Some(auth) = &self.auth {
            if !auth.is_authorized(request) {
                return auth::login_required();
            }
        }
        match request.url().as_str() {
            "/varz" => varz(),
            "/" => rouille::session::session(
                request,
                SESSION_COOKIE,
                SESSION_TIMEOUT.as_secs(),
                |session| {
                    self.dispatch(request, session.id())
                        .unwrap_or_else(Response::from)
                },
            ),
            _ => Response::empty_404(),
        }
    }

    fn dispatch(&self, request: &Request, session_id: &str) -> Result<Response, Error> {
        let aop = request.get_param("aop").unwrap_or_default();
        let debug = request.get_param("debug").map_or(false, |v| debug_enabled(&v));
        match (aop.as_str(), request.method()) {
            ("CONFIG.GET", _) => json_response(&self.store.load()?, None),
            ("CONFIG.SET", "POST") => self.config_set(request, session_id),
            ("CONFIG.DOWNLOAD", _) => {
                json_response(&self.store.load()?, Some(&download_filename()?))
            }
            ("HOST.CHECK", _) => self.host_check(request, session_id),
            ("HOST.WAKEUP", "POST") => self.host_wakeup(request, session_id, debug),
            ("", "GET") => json_response(
                &json!({ "csrfToken": self.sessions.csrf_token(session_id) }),
                None,
            ),
            _ => Err(Error::UnknownOperation),
        }
    }

    fn admit(&self, session_id: &str, action: Action) -> Result<(), Error> {
        if !self.sessions.check_rate_limit(session_id, action) {
            metrics::RATE_LIMITED
                .with_label_values(&[action.as_str()])
                .inc();
            warn!("rate limit hit for {}", action.as_str());
            return Err(Error::RateLimited);
        }
        Ok(())
    }

    fn verify_csrf(&self, request: &Request, session_id: &str) -> Result<(), Error> {
        let token = request.header(CSRF_HEADER).unwrap_or("");
        if !self.sessions.validate_csrf(session_id, token) {
            return Err(Error::BadCsrfToken);
        }
        Ok(())
    }

    fn config_set(&self, request: &Request, session_id: &str) -> Result<Response, Error> {
        self.admit(session_id, Action::ConfigSet)?;
        self.verify_csrf(request, session_id)?;
        let hosts = hosts::parse_host_list(&read_body(request)?)?;
        self.store.save(&hosts)?;
        info!(
            "saved {} hosts to {}",
            hosts.len(),
            self.store.path().display()
        );
        let token = self.sessions.rotate_csrf(session_id);
        json_response(&json!({ "status": "OK", "csrfToken": token }), None)
    }

    fn host_check(&self, request: &Request, session_id: &str) -> Result<Response, Error> {
        self.admit(session_id, Action::HostCheck)?;
        let host = request
            .get_param("host")
            .filter(|h| !h.is_empty())
            .ok_or(Error::MissingHost)?;
        if !is_allowed_host(&host) {
            return Err(Error::InvalidHost);
        }
        let result = self.probe.check(&host);
        let label = if result.is_up { "up" } else { "down" };
        metrics::HOST_CHECKS.with_label_values(&[label]).inc();
        let mut data = serde_json::to_value(&result)?;
        data["error"] = json!(false);
        json_response(&data, None)
    }

    fn host_wakeup(
        &self,
        request: &Request,
        session_id: &str,
        debug: bool,
    ) -> Result<Response, Error> {
        self.admit(session_id, Action::HostWakeup)?;
        self.verify_csrf(request, session_id)?;
        let wake = parse_wake_request(&read_body(request)?)?;

        let mut trace = wol::Trace::new();
        match self
            .sender
            .send(&wake.mac, &wake.host, &wake.cidr, &wake.port, &mut trace)
        {
            Ok(dest) => {
                metrics::MAGIC_PACKETS.with_label_values(&["ok"]).inc();
                info!("magic packet for {} sent to {}", wake.mac, dest);
                let token = self.sessions.rotate_csrf(session_id);
                let mut data = json!({
                    "info": format!(
                        "Magic packet has been sent for <strong>{}</strong>. Please wait for the host to come up...",
                        escape_html(&wake.mac)
                    ),
                    "csrfToken": token,
                });
                if debug {
                    data["DEBUG"] = json!(trace.into_lines());
                }
                json_response(&data, None)
            }
            Err(err) => {
                metrics::MAGIC_PACKETS
                    .with_label_values(&[err.kind().as_str()])
                    .inc();
                warn!("wake for '{}' failed: {}", wake.mac, err);
                Err(err.into())
            }
        }
    }
}

fn varz() -> Response {
    match metrics::gather_text() {
        Ok(text) => Response::text(text),
        Err(e) => Response::text(e.to_string()).with_status_code(500),
    }
}
