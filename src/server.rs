use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use crate::health::HealthChecker;

/// Minimal local HTTP endpoint exposing client health and counters.
pub struct HealthServer {
    health_checker: Arc<HealthChecker>,
    port: u16,
}

impl HealthServer {
    pub fn new(health_checker: Arc<HealthChecker>, port: u16) -> Self {
        Self {
            health_checker,
            port,
        }
    }

    pub async fn start(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(format!("127.0.0.1:{}", self.port)).await?;
        tracing::info!("Status server listening on port {}", self.port);

        loop {
            let (mut socket, peer) = listener.accept().await?;
            let health_checker = Arc::clone(&self.health_checker);

            tokio::spawn(async move {
                let mut buffer = [0; 1024];
                let n = match socket.read(&mut buffer).await {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!("Status request from {} failed: {}", peer, e);
                        return;
                    }
                };

                let request = String::from_utf8_lossy(&buffer[..n]);
                let response = handle_request(&request, &health_checker);

                if let Err(e) = socket.write_all(response.as_bytes()).await {
                    tracing::debug!("Status response to {} failed: {}", peer, e);
                }
            });
        }
    }
}

pub(crate) fn handle_request(request: &str, health_checker: &HealthChecker) -> String {
    let Some(request_line) = request.lines().next() else {
        return error_response(400, "Bad Request");
    };

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return error_response(400, "Bad Request");
    }

    match (parts[0], parts[1]) {
        ("GET", "/health") => json(&health_checker.get_health()),
        ("GET", "/metrics") => json(&health_checker.get_metrics()),
        ("GET", "/status") => json(&health_checker.get_detailed_status()),
        ("GET", "/metrics/prometheus") => match health_checker.get_prometheus_metrics() {
            Ok(text) => response(200, "text/plain; version=0.0.4", &text),
            Err(_) => error_response(500, "Internal Server Error"),
        },
        _ => error_response(404, "Not Found"),
    }
}

fn json<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => response(200, "application/json", &body),
        Err(_) => error_response(500, "Internal Server Error"),
    }
}

fn response(status: u16, content_type: &str, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    )
}

fn error_response(status: u16, message: &str) -> String {
    let body = format!("{{\"error\": \"{}\"}}", message);
    response(status, "application/json", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MetricsCollector;

    fn checker() -> HealthChecker {
        HealthChecker::new(Arc::new(MetricsCollector::new()), Config::default())
    }

    #[test]
    fn routes_status_endpoints() {
        let checker = checker();
        assert!(handle_request("GET /health HTTP/1.1\r\n\r\n", &checker).starts_with("HTTP/1.1 200 OK"));
        assert!(handle_request("GET /status HTTP/1.1\r\n\r\n", &checker).contains("\"terminal_count\":25"));
        assert!(handle_request("GET /metrics/prometheus HTTP/1.1\r\n\r\n", &checker).contains("kai_rewards_polls_total 0"));
        assert!(handle_request("GET /nope HTTP/1.1\r\n\r\n", &checker).starts_with("HTTP/1.1 404 Not Found"));
        assert!(handle_request("", &checker).starts_with("HTTP/1.1 400"));
    }
}
