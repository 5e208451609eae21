use std::{
    io::{BufRead, BufReader, Read, Write},
    net::TcpStream,
    thread,
    time::Duration,
};

use anyhow::Context;
use tracing::{info, warn};

use climescope_common::{
    NetworkLink, PredictionTransport, Reading, SensorSource, Station, StationConfig,
    TransportError, TransportResponse,
};

use crate::net::{push_capped, DashboardListener, MonotonicClock};

const HOST_HTTP_PORT: u16 = 8080;
const POST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_BODY: usize = 64 * 1024;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Deterministic stand-in for the DHT11 + MQ-135 pair.
struct SimulatedSensors {
    tick: u64,
}

impl SensorSource for SimulatedSensors {
    fn read(&mut self) -> Reading {
        self.tick = self.tick.saturating_add(1);

        // Hardware integration point: the esp build reads the real DHT11/ADC.
        let temperature_c = 27.0 + ((self.tick % 8) as f32 * 0.2);
        let humidity_pct = 62.0 + ((self.tick % 6) as f32 * 0.5);
        let gas_raw = 140 + ((self.tick % 10) as u16 * 15);

        Reading::from_parts(Some(temperature_c), Some(humidity_pct), gas_raw)
    }
}

/// The host always has its loopback route.
struct HostLink;

impl NetworkLink for HostLink {
    fn is_connected(&self) -> bool {
        true
    }
}

struct HttpPostTransport;

impl PredictionTransport for HttpPostTransport {
    fn post_json(&mut self, url: &str, body: &str) -> Result<TransportResponse, TransportError> {
        let (host, port, path) = split_http_url(url)?;

        let mut stream = TcpStream::connect((host.as_str(), port))
            .map_err(|err| TransportError(format!("connection failed: {err}")))?;
        stream
            .set_read_timeout(Some(POST_TIMEOUT))
            .map_err(|err| TransportError(err.to_string()))?;

        let request = format!(
            "POST {path} HTTP/1.1\r\nHost: {host}:{port}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream
            .write_all(request.as_bytes())
            .map_err(|err| TransportError(format!("send failed: {err}")))?;

        read_http_response(&mut BufReader::new(stream))
    }
}

fn split_http_url(url: &str) -> Result<(String, u16, String), TransportError> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| TransportError(format!("unsupported url `{url}`")))?;
    let (authority, path) = match rest.find('/') {
        Some(index) => (&rest[..index], &rest[index..]),
        None => (rest, "/"),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>()
                .map_err(|_| TransportError(format!("invalid port in `{url}`")))?,
        ),
        None => (authority, 80),
    };
    if host.is_empty() {
        return Err(TransportError(format!("missing host in `{url}`")));
    }
    Ok((host.to_string(), port, path.to_string()))
}

fn read_failed(err: std::io::Error) -> TransportError {
    TransportError(format!("read failed: {err}"))
}

/// Reads one line without its CRLF. `None` at end of stream.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, TransportError> {
    let mut raw = Vec::new();
    if reader.read_until(b'\n', &mut raw).map_err(read_failed)? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&raw);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Reads status line, headers and a body framed by `Content-Length`,
/// chunked transfer coding, or the peer closing the connection.
fn read_http_response<R: BufRead>(reader: &mut R) -> Result<TransportResponse, TransportError> {
    let status = read_line(reader)?
        .as_deref()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| TransportError("malformed HTTP status line".to_string()))?;

    let mut content_length = None;
    let mut chunked = false;
    loop {
        let line = read_line(reader)?
            .ok_or_else(|| TransportError("connection closed inside headers".to_string()))?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            let length = value
                .parse::<usize>()
                .map_err(|_| TransportError(format!("invalid Content-Length `{value}`")))?;
            content_length = Some(length);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value
                .rsplit(',')
                .next()
                .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        }
    }

    let body = if chunked {
        read_chunked_body(reader)?
    } else if let Some(length) = content_length {
        if length > MAX_RESPONSE_BODY {
            return Err(TransportError(format!(
                "response body of {length} bytes exceeds {MAX_RESPONSE_BODY}"
            )));
        }
        let mut body = vec![0_u8; length];
        reader.read_exact(&mut body).map_err(read_failed)?;
        body
    } else {
        let mut body = Vec::new();
        let mut chunk = [0_u8; 512];
        loop {
            let read = reader.read(&mut chunk).map_err(read_failed)?;
            if read == 0 {
                break;
            }
            if push_capped(&mut body, &chunk[..read], MAX_RESPONSE_BODY) {
                warn!("prediction response truncated at {MAX_RESPONSE_BODY} bytes");
                break;
            }
        }
        body
    };

    Ok(TransportResponse {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn read_chunked_body<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    loop {
        let size_line = read_line(reader)?
            .ok_or_else(|| TransportError("connection closed inside chunked body".to_string()))?;
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| TransportError(format!("invalid chunk size `{size_hex}`")))?;
        if size == 0 {
            // Trailer section ends with an empty line; a missing one is tolerated.
            while let Some(line) = read_line(reader)? {
                if line.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        if body.len().saturating_add(size) > MAX_RESPONSE_BODY {
            return Err(TransportError(format!(
                "chunked response exceeds {MAX_RESPONSE_BODY} bytes"
            )));
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).map_err(read_failed)?;
        match read_line(reader)? {
            Some(line) if line.is_empty() => {}
            _ => return Err(TransportError("chunk not terminated by CRLF".to_string())),
        }
    }
}

fn load_config() -> anyhow::Result<StationConfig> {
    let mut config = match std::env::var("CLIMESCOPE_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            StationConfig::from_json(&raw).with_context(|| format!("invalid config file {path}"))?
        }
        Err(_) => StationConfig {
            predict_endpoint: "http://127.0.0.1:5000/predict".to_string(),
            http_port: HOST_HTTP_PORT,
            ..StationConfig::default()
        },
    };

    if let Ok(endpoint) = std::env::var("CLIMESCOPE_ENDPOINT") {
        config.predict_endpoint = endpoint;
    }
    if let Some(port) = std::env::var("CLIMESCOPE_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }
    if let Some(interval) = std::env::var("CLIMESCOPE_INTERVAL_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
    {
        config.prediction_interval_ms = interval;
    }

    config.sanitize();
    config.validate().context("invalid station config")?;
    ensure_plain_http(&config)?;
    Ok(config)
}

/// The host transport has no TLS, so an `https://` endpoint would fail every
/// cycle.
fn ensure_plain_http(config: &StationConfig) -> anyhow::Result<()> {
    if !config.predict_endpoint.starts_with("http://") {
        anyhow::bail!(
            "host build only speaks plain http, got endpoint `{}`",
            config.predict_endpoint
        );
    }
    Ok(())
}

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;

    let mut sensors = SimulatedSensors { tick: 0 };
    let initial = sensors.read();
    info!(
        "initial temperature: {:.1} °C, humidity: {:.1} %",
        initial.temperature_c, initial.humidity_pct
    );

    let listener = match DashboardListener::bind(config.http_port) {
        Ok(listener) => {
            if let Ok(addr) = listener.local_addr() {
                info!("dashboard listening on http://{addr}");
            }
            Some(listener)
        }
        Err(err) => {
            warn!(
                "failed to bind dashboard on port {}: {err}; running without it",
                config.http_port
            );
            None
        }
    };

    info!("predictions from {}", config.predict_endpoint);
    let mut station = Station::new(
        config,
        sensors,
        HostLink,
        HttpPostTransport,
        listener,
        MonotonicClock::new(),
    );
    station.startup();
    station.run(|| thread::sleep(IDLE_SLEEP))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use climescope_common::parse_predictions;

    use super::*;

    #[test]
    fn splits_endpoint_url() {
        assert_eq!(
            split_http_url("http://10.38.192.228:5000/predict").unwrap(),
            ("10.38.192.228".to_string(), 5000, "/predict".to_string())
        );
        assert_eq!(
            split_http_url("http://localhost").unwrap(),
            ("localhost".to_string(), 80, "/".to_string())
        );
        assert!(split_http_url("https://example.com/predict").is_err());
        assert!(split_http_url("http://:5000/predict").is_err());
    }

    fn read_reply(raw: &[u8]) -> Result<TransportResponse, TransportError> {
        read_http_response(&mut Cursor::new(raw))
    }

    #[test]
    fn reads_exactly_content_length_bytes() {
        let raw = b"HTTP/1.1 200 OK\r\nServer: Werkzeug/3.0\r\nContent-Type: application/json\r\nContent-Length: 76\r\n\r\n{\"next_day_predictions\":{\"aqi\":104.18,\"humidity\":73.21,\"temperature\":31.71}}HTTP/1.1 400 Bad Request\r\n";
        let response = read_reply(raw).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(
            response.body,
            r#"{"next_day_predictions":{"aqi":104.18,"humidity":73.21,"temperature":31.71}}"#
        );
    }

    #[test]
    fn joins_chunks_split_inside_a_value() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
24\r\n{\"next_day_predictions\":{\"aqi\":104.1\r\n\
28\r\n8,\"humidity\":73.21,\"temperature\":31.71}}\r\n\
0\r\n\r\n";
        let response = read_reply(raw).unwrap();
        let values = parse_predictions(&response.body).unwrap();

        assert_eq!(values.aqi, 104.18);
        assert_eq!(values.humidity_pct, 73.21);
        assert_eq!(values.temperature_c, 31.71);
        assert!(values.lenient_fields.is_empty());
    }

    #[test]
    fn rejects_truncated_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n20\r\n{\"next_day";
        assert!(read_reply(raw).is_err());
    }

    #[test]
    fn reads_body_until_close_without_framing() {
        let raw = b"HTTP/1.0 500 INTERNAL SERVER ERROR\r\n\r\n{\"error\":\"model not loaded\"}";
        let response = read_reply(raw).unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(response.body, r#"{"error":"model not loaded"}"#);
    }

    #[test]
    fn rejects_garbage_status_line() {
        assert!(read_reply(b"hello").is_err());
        assert!(read_reply(b"").is_err());
    }

    #[test]
    fn host_config_refuses_https_endpoint() {
        let mut config = StationConfig {
            predict_endpoint: "https://10.0.0.5/predict".to_string(),
            ..StationConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(ensure_plain_http(&config).is_err());

        config.predict_endpoint = "http://10.0.0.5/predict".to_string();
        assert!(ensure_plain_http(&config).is_ok());
    }

    #[test]
    fn simulated_sensors_produce_valid_readings() {
        let mut sensors = SimulatedSensors { tick: 0 };
        for _ in 0..20 {
            assert!(sensors.read().is_valid());
        }
    }
}
