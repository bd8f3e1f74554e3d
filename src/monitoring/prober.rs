//! Probe executor: one outbound request per invocation, every failure mode
//! folded into the returned outcome.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::Deserialize;

use crate::db::entities::monitor;
use crate::db::enums::ProbeKind;

/// Error text recorded when the probe deadline expires.
pub const TIMEOUT_ERROR: &str = "timeout";

/// Raw outcome of a single probe. `Completed` carries whatever the target
/// answered, healthy or not; `Failed` covers timeouts and transport errors,
/// where no latency is meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Completed { latency_ms: i32, http_status: u16 },
    Failed { error: String },
}

#[derive(Deserialize)]
struct HeaderEntry {
    key: String,
    value: String,
}

/// Shared client for all HTTP probes. Redirects are not followed so that
/// 3xx answers reach the classifier as-is.
pub fn build_client() -> Client {
    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap() // Should not fail with default settings
}

/// Executes one probe for the monitor, dispatching on its probe kind.
/// Never panics and never returns an error past this boundary.
pub async fn execute(client: &Client, monitor: &monitor::Model) -> ProbeOutcome {
    match monitor.kind {
        ProbeKind::Http => http_probe(client, monitor).await,
    }
}

async fn http_probe(client: &Client, monitor: &monitor::Model) -> ProbeOutcome {
    let method = Method::from_bytes(monitor.method.as_bytes()).unwrap_or(Method::GET);
    let timeout = Duration::from_millis(monitor.timeout_ms.max(1) as u64);

    let mut request = client.request(method, &monitor.url).timeout(timeout);
    if let Some(headers) = &monitor.headers {
        request = request.headers(parse_headers(headers));
    }

    let start = Instant::now();
    match request.send().await {
        Ok(response) => ProbeOutcome::Completed {
            latency_ms: start.elapsed().as_millis() as i32,
            http_status: response.status().as_u16(),
        },
        Err(e) if e.is_timeout() => ProbeOutcome::Failed {
            error: TIMEOUT_ERROR.to_string(),
        },
        Err(e) => ProbeOutcome::Failed {
            error: format!("Error: {e}"),
        },
    }
}

/// Custom headers are stored as a JSON list of `{key, value}` entries;
/// malformed entries are dropped rather than failing the probe.
fn parse_headers(raw: &serde_json::Value) -> HeaderMap {
    let mut map = HeaderMap::new();
    let Ok(entries) = serde_json::from_value::<Vec<HeaderEntry>>(raw.clone()) else {
        return map;
    };
    for entry in entries {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(entry.key.as_bytes()),
            HeaderValue::from_str(&entry.value),
        ) {
            map.insert(name, value);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_list() {
        let raw = serde_json::json!([
            { "key": "Authorization", "value": "Bearer token" },
            { "key": "X-Probe", "value": "statuswatch" }
        ]);
        let headers = parse_headers(&raw);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-probe").unwrap(), "statuswatch");
    }

    #[test]
    fn malformed_headers_are_dropped() {
        let raw = serde_json::json!([
            { "key": "bad header name", "value": "x" },
            { "key": "X-Ok", "value": "1" }
        ]);
        let headers = parse_headers(&raw);
        assert_eq!(headers.len(), 1);
        assert!(headers.get("x-ok").is_some());
    }

    #[test]
    fn non_list_headers_yield_empty_map() {
        let raw = serde_json::json!({ "not": "a list" });
        assert!(parse_headers(&raw).is_empty());
    }
}
