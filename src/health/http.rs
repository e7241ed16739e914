use std::time::{Duration, Instant};

use super::{Checker, HealthResult, ProbeError};

/// HTTP transport used by [`HttpProbe`], separated out so tests can fake the
/// wire.
pub trait HttpTransport: Send {
    /// Performs one request and returns the observed status code. Redirects
    /// must not be followed; the first status is the answer.
    fn request(&self, method: &str, url: &str, timeout: Duration) -> Result<u16, ProbeError>;
}

/// Production transport over a blocking `reqwest` client.
#[derive(Default)]
pub struct BlockingTransport;

impl HttpTransport for BlockingTransport {
    fn request(&self, method: &str, url: &str, timeout: Duration) -> Result<u16, ProbeError> {
        let url = url::Url::parse(url).map_err(|err| ProbeError::Io(err.to_string()))?;

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| ProbeError::Io(err.to_string()))?;

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|err| ProbeError::Io(err.to_string()))?;

        let response = client.request(method, url).send().map_err(|err| {
            if err.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Io(err.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

/// Probes an HTTP endpoint and compares the status code against the
/// configured expectation.
pub struct HttpProbe<T: HttpTransport = BlockingTransport> {
    name: String,
    endpoint: String,
    method: String,
    expected_status: u16,
    transport: T,
}

impl HttpProbe {
    pub fn new(name: String, endpoint: String, method: String, expected_status: u16) -> Self {
        Self::with_transport(name, endpoint, method, expected_status, BlockingTransport)
    }
}

impl<T: HttpTransport> HttpProbe<T> {
    pub fn with_transport(
        name: String,
        endpoint: String,
        method: String,
        expected_status: u16,
        transport: T,
    ) -> Self {
        Self {
            name,
            endpoint,
            method,
            expected_status,
            transport,
        }
    }
}

impl<T: HttpTransport> Checker for HttpProbe<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "http"
    }

    fn check(&self, timeout: Duration) -> HealthResult {
        let begin = Instant::now();
        match self
            .transport
            .request(&self.method, &self.endpoint, timeout)
        {
            Ok(status) if status == self.expected_status => HealthResult::healthy(
                format!("{} {} returned {status}", self.method, self.endpoint),
                begin.elapsed(),
            ),
            Ok(status) => HealthResult::unhealthy(
                format!("{} {} returned {status}", self.method, self.endpoint),
                begin.elapsed(),
                ProbeError::StatusMismatch {
                    expected: self.expected_status,
                    got: status,
                },
            ),
            Err(err) => HealthResult::unhealthy(
                format!("{} {} failed", self.method, self.endpoint),
                begin.elapsed(),
                err,
            ),
        }
    }
}
