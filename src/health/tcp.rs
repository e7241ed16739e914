use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::{Checker, HealthResult, ProbeError};

/// Connect probe: healthy iff a TCP connection to host:port can be opened
/// within the timeout. The connection is dropped immediately.
pub struct TcpProbe {
    name: String,
    host: String,
    port: u16,
    kind: &'static str,
}

impl TcpProbe {
    pub fn new(name: String, host: String, port: u16) -> Self {
        Self {
            name,
            host,
            port,
            kind: "tcp",
        }
    }

    /// gRPC checks reduce to a connect probe of the serving port.
    pub fn grpc(name: String, host: String, port: u16) -> Self {
        Self {
            kind: "grpc",
            ..Self::new(name, host, port)
        }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Checker for TcpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn check(&self, timeout: Duration) -> HealthResult {
        let begin = Instant::now();
        let target = self.target();

        let addr = match target.to_socket_addrs().map(|mut a| a.next()) {
            Ok(Some(addr)) => addr,
            Ok(None) | Err(_) => {
                return HealthResult::unhealthy(
                    format!("cannot resolve {target}"),
                    begin.elapsed(),
                    ProbeError::Io(format!("no address for {target}")),
                );
            }
        };

        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                drop(stream);
                HealthResult::healthy(format!("connected to {target}"), begin.elapsed())
            }
            Err(err) => HealthResult::unhealthy(
                format!("connect to {target} failed"),
                begin.elapsed(),
                ProbeError::Io(err.to_string()),
            ),
        }
    }
}
