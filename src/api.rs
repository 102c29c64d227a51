use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::dispatch::{DispatchError, VibrationRequest};
use crate::form::{FormSnapshot, FormState};
use crate::platform::Vibrator;

pub const MDNS_SERVICE_TYPE: &str = "_vibectl._tcp.local.";
const MAX_BODY_BYTES: usize = 16 * 1024;
const RECV_BACKOFF_STEP_MS: u64 = 50;
const RECV_BACKOFF_MAX_MS: u64 = 2_000;

/// Partial edit of the form fields. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormUpdate {
    pub duration_text: Option<String>,
    pub pattern_text: Option<String>,
    pub repeat: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateResponse {
    pub form: FormSnapshot,
    pub backend: &'static str,
    pub active: bool,
    pub last_request: Option<VibrationRequest>,
    pub total_requests: u64,
    pub server_started_unix_ms: i64,
    pub updated_unix_ms: i64,
    pub response_iso_local: String,
}

pub struct ApiSharedState {
    form: FormState,
    vibrator: Box<dyn Vibrator>,
    last_request: Option<VibrationRequest>,
    total_requests: u64,
    server_started_unix_ms: i64,
    updated_unix_ms: i64,
}

impl ApiSharedState {
    pub fn new(form: FormState, vibrator: Box<dyn Vibrator>) -> Self {
        let now_ms = Local::now().timestamp_millis();
        Self {
            form,
            vibrator,
            last_request: None,
            total_requests: 0,
            server_started_unix_ms: now_ms,
            updated_unix_ms: now_ms,
        }
    }

    pub fn apply_update(&mut self, update: &FormUpdate) {
        if let Some(text) = update.duration_text.as_deref() {
            self.form.set_duration_text(text);
        }
        if let Some(text) = update.pattern_text.as_deref() {
            self.form.set_pattern_text(text);
        }
        if let Some(repeat) = update.repeat {
            self.form.set_repeat(repeat);
        }
        self.touch();
    }

    pub fn vibrate(&mut self) -> Result<VibrationRequest, DispatchError> {
        let outcome = self.form.press_vibrate(self.vibrator.as_mut());
        if let Ok(request) = &outcome {
            self.last_request = Some(request.clone());
        }
        self.touch();
        outcome
    }

    pub fn cancel(&mut self) {
        self.form.press_cancel(self.vibrator.as_mut());
        self.touch();
    }

    pub fn snapshot(&self) -> StateResponse {
        StateResponse {
            form: self.form.snapshot(),
            backend: self.vibrator.label(),
            active: self.vibrator.is_active(),
            last_request: self.last_request.clone(),
            total_requests: self.total_requests,
            server_started_unix_ms: self.server_started_unix_ms,
            updated_unix_ms: self.updated_unix_ms,
            response_iso_local: Local::now().to_rfc3339(),
        }
    }

    fn touch(&mut self) {
        self.updated_unix_ms = Local::now().timestamp_millis();
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub mdns_enabled: bool,
    pub mdns_instance: String,
}

pub struct ApiServer {
    pub local_addr: Option<SocketAddr>,
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
    mdns: Option<ServiceDaemon>,
}

impl ApiServer {
    pub fn start(config: ApiServerConfig, state: ApiSharedState) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        let local_addr = server.server_addr().to_ip();
        let state = Arc::new(Mutex::new(state));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let http_join = thread::Builder::new()
            .name("vibectl-api".to_string())
            .spawn(move || run_server_loop(server, state, stop_for_thread))
            .context("failed to spawn API thread")?;

        let advertised_port = local_addr.map(|addr| addr.port()).unwrap_or(config.port);
        let mdns = if config.mdns_enabled {
            match start_mdns_advertisement(advertised_port, &config.mdns_instance) {
                Ok(daemon) => Some(daemon),
                Err(err) => {
                    warn!("mDNS advertisement disabled: {err:#}");
                    None
                }
            }
        } else {
            None
        };

        info!("API listening on {bind}");
        Ok(Self {
            local_addr,
            stop,
            http_join: Some(http_join),
            mdns,
        })
    }

    /// Blocks until the server thread exits.
    pub fn wait(mut self) {
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
        if let Some(mdns) = self.mdns.take() {
            let _ = mdns.shutdown();
        }
    }
}

fn run_server_loop(server: Server, state: Arc<Mutex<ApiSharedState>>, stop: Arc<AtomicBool>) {
    let mut failures: u32 = 0;
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => {
                failures = 0;
                handle_request(request, &state);
            }
            Ok(None) => failures = 0,
            Err(err) => {
                failures = failures.saturating_add(1);
                let pause = recv_error_backoff(failures);
                warn!("API receive failed ({failures} in a row), retrying in {pause:?}: {err}");
                thread::sleep(pause);
            }
        }
    }
}

/// Linear back-off after consecutive receive errors, capped so a stop request
/// is still noticed promptly.
fn recv_error_backoff(consecutive_failures: u32) -> Duration {
    let steps = u64::from(consecutive_failures.max(1));
    Duration::from_millis(
        steps
            .saturating_mul(RECV_BACKOFF_STEP_MS)
            .min(RECV_BACKOFF_MAX_MS),
    )
}

fn start_mdns_advertisement(api_port: u16, instance_prefix: &str) -> Result<ServiceDaemon> {
    let daemon = ServiceDaemon::new()
        .map_err(|err| anyhow::anyhow!("could not create mDNS daemon: {err}"))?;

    let hostname = detect_hostname();
    let instance = if instance_prefix.trim().is_empty() {
        hostname.clone()
    } else {
        format!("{}-{}", instance_prefix.trim(), hostname)
    };
    let host_name = format!("{hostname}.local.");
    let mut addresses = detect_mdns_addresses();
    if addresses.is_empty() {
        addresses.push(Ipv4Addr::LOCALHOST.into());
    }

    let service = ServiceInfo::new(
        MDNS_SERVICE_TYPE,
        &instance,
        &host_name,
        addresses.as_slice(),
        api_port,
        None,
    )
    .map_err(|err| anyhow::anyhow!("could not create mDNS service info: {err}"))?;
    daemon
        .register(service)
        .map_err(|err| anyhow::anyhow!("could not register mDNS service: {err}"))?;
    Ok(daemon)
}

fn detect_hostname() -> String {
    let candidate = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "vibectl".to_string());
    sanitize_hostname(&candidate)
}

fn sanitize_hostname(candidate: &str) -> String {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return "vibectl".to_string();
    }
    trimmed
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
}

fn detect_mdns_addresses() -> Vec<IpAddr> {
    let mut addresses = Vec::<IpAddr>::new();
    if let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        && socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).is_ok()
        && let Ok(local) = socket.local_addr()
    {
        let ip = local.ip();
        if ip.is_ipv4() && !ip.is_loopback() {
            addresses.push(ip);
        }
    }
    addresses
}

fn handle_request(mut request: tiny_http::Request, state: &Arc<Mutex<ApiSharedState>>) {
    let Some(remote_addr) = request.remote_addr() else {
        let _ = send_text(request, StatusCode(400), "missing remote address");
        return;
    };
    if !is_local_network_ip(remote_addr.ip()) {
        let _ = send_text(request, StatusCode(403), "forbidden: local network only");
        return;
    }

    let url = request.url().to_string();
    let (path, _query) = split_path_query(&url);
    let method = request.method().clone();

    let update = if method == Method::Post {
        match read_form_update(&mut request) {
            Ok(update) => update,
            Err(err) => {
                let _ = send_text(request, StatusCode(400), &format!("bad request: {err:#}"));
                return;
            }
        }
    } else {
        None
    };

    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(_) => {
            let _ = send_text(request, StatusCode(500), "internal state lock error");
            return;
        }
    };
    guard.total_requests = guard.total_requests.saturating_add(1);

    match (&method, path) {
        (Method::Get, "/healthz") => {
            let _ = send_text(request, StatusCode(200), "ok");
        }
        (Method::Get, "/v1") => {
            #[derive(Serialize)]
            struct ApiIndexResponse {
                api_base: String,
                state_url: String,
                form_url: String,
                vibrate_url: String,
                cancel_url: String,
                health_url: String,
            }

            let base_url = request_base_url(&request);
            let payload = ApiIndexResponse {
                state_url: format!("{base_url}/v1/state"),
                form_url: format!("{base_url}/v1/form"),
                vibrate_url: format!("{base_url}/v1/vibrate"),
                cancel_url: format!("{base_url}/v1/cancel"),
                health_url: format!("{base_url}/healthz"),
                api_base: base_url,
            };
            let _ = send_json(request, StatusCode(200), &payload);
        }
        (Method::Get, "/" | "/v1/state") => {
            let _ = send_json(request, StatusCode(200), &guard.snapshot());
        }
        (Method::Post, "/v1/form") => {
            guard.apply_update(&update.unwrap_or_default());
            let _ = send_json(request, StatusCode(200), &guard.snapshot());
        }
        (Method::Post, "/v1/vibrate") => {
            if let Some(update) = update {
                guard.apply_update(&update);
            }
            let status = match guard.vibrate() {
                Ok(_) => StatusCode(200),
                Err(err) => status_for_dispatch_error(&err),
            };
            let _ = send_json(request, status, &guard.snapshot());
        }
        (Method::Post, "/v1/cancel") => {
            guard.cancel();
            let _ = send_json(request, StatusCode(200), &guard.snapshot());
        }
        (_, "/healthz" | "/v1" | "/" | "/v1/state" | "/v1/form" | "/v1/vibrate" | "/v1/cancel") => {
            let _ = send_text(request, StatusCode(405), "method not allowed");
        }
        _ => {
            let _ = send_text(request, StatusCode(404), "not found");
        }
    }
}

fn status_for_dispatch_error(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::Validation => StatusCode(422),
        DispatchError::Platform(_) => StatusCode(502),
    }
}

fn read_form_update(request: &mut tiny_http::Request) -> Result<Option<FormUpdate>> {
    if request.body_length().is_some_and(|len| len > MAX_BODY_BYTES) {
        anyhow::bail!("body larger than {MAX_BODY_BYTES} bytes");
    }
    let mut body = String::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_string(&mut body)
        .context("unable to read request body")?;
    if body.len() > MAX_BODY_BYTES {
        anyhow::bail!("body larger than {MAX_BODY_BYTES} bytes");
    }
    parse_form_update(&body)
}

fn parse_form_update(body: &str) -> Result<Option<FormUpdate>> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let update = serde_json::from_str::<FormUpdate>(body).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;
    Ok(Some(update))
}

fn send_json<T: Serialize>(
    request: tiny_http::Request,
    status: StatusCode,
    body: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn send_text(request: tiny_http::Request, status: StatusCode, body: &str) -> Result<()> {
    let content_type = Header::from_str("Content-Type: text/plain; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_string(body.to_string())
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn request_base_url(request: &tiny_http::Request) -> String {
    for header in request.headers() {
        if header.field.equiv("Host") {
            let host = header.value.as_str().trim();
            if !host.is_empty() {
                return format!("http://{host}");
            }
        }
    }
    "http://127.0.0.1:8098".to_string()
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        None => false,
    }
}
