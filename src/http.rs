use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use crate::error::FinderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Address the response was finally served from, after redirects.
    pub final_url: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turns a non-2xx answer into [`FinderError::HttpStatus`].
    pub fn require_success(self, url: &str) -> Result<Self, FinderError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(FinderError::HttpStatus {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

/// Blocking GET capability shared by every directory, the validator and the fallbacks.
///
/// Transport failures come back as [`FinderError::NetworkTransient`]; any answer the
/// server did give, including 4xx/5xx, comes back as `Ok` so callers can classify it.
pub trait HttpFetcher: Send + Sync {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, FinderError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FinderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|err| FinderError::ClientSetup(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| FinderError::ClientSetup(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, FinderError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| FinderError::ClientSetup(err.to_string()))?;
            let value =
                HeaderValue::from_str(value).map_err(|err| FinderError::ClientSetup(err.to_string()))?;
            request = request.header(name, value);
        }
        let response = request.send().map_err(|err| FinderError::NetworkTransient {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .bytes()
            .map_err(|err| FinderError::NetworkTransient {
                url: url.to_string(),
                message: err.to_string(),
            })?
            .to_vec();
        Ok(HttpResponse {
            status,
            final_url,
            body,
        })
    }
}

/// Exponential backoff for transient transport failures only; status codes are returned as-is.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_tries: u32,
    pub base_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_tries: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl Backoff {
    pub fn none() -> Self {
        Self {
            max_tries: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn get(
        &self,
        fetcher: &dyn HttpFetcher,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FinderError> {
        let mut attempt = 0u32;
        loop {
            match fetcher.get(url, headers) {
                Err(err) if err.is_transient() && attempt + 1 < self.max_tries => {
                    let delay = self.base_delay * 2u32.pow(attempt);
                    tracing::debug!(url, attempt, ?delay, "transient failure, backing off");
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Flaky {
        failures_left: Mutex<u32>,
    }

    impl HttpFetcher for Flaky {
        fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<HttpResponse, FinderError> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(FinderError::NetworkTransient {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            Ok(HttpResponse {
                status: 200,
                final_url: url.to_string(),
                body: b"ok".to_vec(),
            })
        }
    }

    fn quick(max_tries: u32) -> Backoff {
        Backoff {
            max_tries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_recovers_from_transient_failures() {
        let fetcher = Flaky {
            failures_left: Mutex::new(2),
        };
        let response = quick(5).get(&fetcher, "https://example.org", &[]).unwrap();
        assert_eq!(response.text(), "ok");
    }

    #[test]
    fn backoff_gives_up_after_max_tries() {
        let fetcher = Flaky {
            failures_left: Mutex::new(10),
        };
        let err = quick(3).get(&fetcher, "https://example.org", &[]).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(*fetcher.failures_left.lock().unwrap(), 7);
    }
}
