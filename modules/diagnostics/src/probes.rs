//! The stock probes: TCP reachability, DNS, ICMP ping (via the system `ping`),
//! HTTP and HTTPS.

use async_trait::async_trait;
use recon_core::process::CommandTemplate;
use recon_core::{classify, extract_host, sanitize, Error, Result, TargetKind};
use reqwest::{redirect::Policy, Client};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

/// One connectivity test. `Ok(false)` means the target failed the test;
/// `Err` means the test itself could not run.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, target: &str) -> Result<bool>;
}

/// URLs are probed by host; everything else is used as given.
fn host_of(target: &str) -> String {
    match classify(target) {
        TargetKind::Url => extract_host(target).unwrap_or_else(|| target.to_string()),
        _ => target.to_string(),
    }
}

async fn resolve(host: &str, port: u16, limit: Duration) -> Vec<SocketAddr> {
    match timeout(limit, lookup_host((host, port))).await {
        Ok(Ok(addrs)) => addrs.collect(),
        Ok(Err(e)) => {
            debug!(host, error = %e, "resolution failed");
            Vec::new()
        }
        Err(_) => Vec::new(),
    }
}

/// Reachable when a TCP connect to any of `ports` succeeds within the timeout.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    pub ports: Vec<u16>,
    pub timeout: Duration,
}

#[async_trait]
impl Probe for TcpConnectProbe {
    async fn check(&self, target: &str) -> Result<bool> {
        let host = host_of(target);
        for &p in &self.ports {
            for addr in resolve(&host, p, self.timeout).await {
                if let Ok(Ok(_)) = timeout(self.timeout, TcpStream::connect(addr)).await {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[derive(Debug, Clone)]
pub struct DnsProbe {
    pub timeout: Duration,
}

#[async_trait]
impl Probe for DnsProbe {
    async fn check(&self, target: &str) -> Result<bool> {
        Ok(!resolve(&host_of(target), 0, self.timeout).await.is_empty())
    }
}

/// Runs the system ping once; success is a zero exit status.
#[derive(Debug, Clone)]
pub struct PingProbe {
    pub template: CommandTemplate,
    pub timeout: Duration,
}

impl PingProbe {
    pub fn system(timeout: Duration) -> Self {
        let wait = timeout.as_secs().max(1).to_string();
        PingProbe { template: CommandTemplate::new("ping", ["-c", "1", "-W", wait.as_str(), "{target}"]), timeout }
    }
}

#[async_trait]
impl Probe for PingProbe {
    async fn check(&self, target: &str) -> Result<bool> {
        let clean = sanitize(&host_of(target))?;
        // Give ping its own -W budget plus slack before killing it.
        let captured = self.template.run(&clean, self.timeout + Duration::from_secs(1)).await?;
        Ok(captured.success())
    }
}

/// Available when the server answers at all, whatever the status code.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    scheme: &'static str,
}

impl HttpProbe {
    pub fn http(client: Client) -> Self {
        HttpProbe { client, scheme: "http" }
    }

    pub fn https(client: Client) -> Self {
        HttpProbe { client, scheme: "https" }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, target: &str) -> Result<bool> {
        let url = format!("{}://{}/", self.scheme, host_of(target));
        match self.client.get(&url).send().await {
            Ok(resp) => {
                debug!(%url, status = resp.status().as_u16(), "http probe answered");
                Ok(true)
            }
            Err(e) if e.is_builder() => Err(Error::Probe(e.to_string())),
            Err(e) => {
                debug!(%url, error = %e, "http probe failed");
                Ok(false)
            }
        }
    }
}

pub fn http_client(timeout: Duration, user_agent: &str) -> Result<Client> {
    Client::builder()
        .redirect(Policy::limited(3))
        .no_proxy()
        .timeout(timeout)
        .user_agent(user_agent)
        .gzip(true)
        .build()
        .map_err(|e| Error::Probe(format!("http client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const T: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn tcp_probe_sees_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let probe = TcpConnectProbe { ports: vec![open], timeout: T };
        assert!(probe.check("127.0.0.1").await.unwrap());

        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let probe = TcpConnectProbe { ports: vec![closed], timeout: T };
        assert!(!probe.check("127.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn dns_probe_resolves_literal_addresses() {
        let probe = DnsProbe { timeout: T };
        assert!(probe.check("127.0.0.1").await.unwrap());
        assert!(!probe.check("no-such-host.invalid").await.unwrap());
    }

    #[tokio::test]
    async fn ping_probe_rejects_unsanitary_targets() {
        let probe = PingProbe::system(T);
        let err = probe.check("bad/target").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ping_probe_follows_exit_status() {
        let ok = PingProbe { template: CommandTemplate::new("sh", ["-c", "exit 0", "{target}"]), timeout: T };
        assert!(ok.check("example.com").await.unwrap());
        let down = PingProbe { template: CommandTemplate::new("sh", ["-c", "exit 1", "{target}"]), timeout: T };
        assert!(!down.check("example.com").await.unwrap());
    }

    #[test]
    fn system_ping_waits_at_least_a_second() {
        let p = PingProbe::system(Duration::from_millis(200));
        assert_eq!(p.template.args, vec!["-c", "1", "-W", "1", "{target}"]);
    }

    #[tokio::test]
    async fn http_probe_counts_any_answer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let _ = sock
                    .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });
        let probe = HttpProbe::http(http_client(T, "recon-test").unwrap());
        assert!(probe.check(&addr.to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn http_probe_reports_refused_as_unavailable() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let probe = HttpProbe::http(http_client(T, "recon-test").unwrap());
        assert!(!probe.check(&format!("127.0.0.1:{}", port)).await.unwrap());
    }

    #[test]
    fn urls_are_probed_by_host() {
        assert_eq!(host_of("https://Example.com/login"), "example.com");
        assert_eq!(host_of("8.8.8.8"), "8.8.8.8");
    }
}
