use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use super::pool::{Task, WorkerPool};
use crate::errors::RequestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fetched page. `url` is the URL that was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Performs a single HTTP exchange. Only `InvalidUrl` and `Connectivity`
/// are reported as errors; any HTTP status comes back as a page.
pub trait PageFetcher: Send + Sync {
    fn fetch(&self, method: Method, url: &str, body: Option<&str>) -> Result<Page, RequestError>;
}

pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl PageFetcher for UreqFetcher {
    fn fetch(&self, method: Method, url: &str, body: Option<&str>) -> Result<Page, RequestError> {
        let request = match method {
            Method::Get => self.agent.get(url),
            Method::Post => self.agent.post(url),
        }
        .set("Accept-Language", "en-US,en;q=0.9");

        let result = match body {
            Some(body) => request.send_string(body),
            None => request.call(),
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                debug!("transport error for {}: {}", url, transport);
                return Err(match transport.kind() {
                    ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                        RequestError::InvalidUrl { url: url.to_string() }
                    }
                    _ => RequestError::Connectivity { url: url.to_string() },
                });
            }
        };

        let status = response.status();
        let body = response
            .into_string()
            .map_err(|_| RequestError::Connectivity { url: url.to_string() })?;
        Ok(Page {
            url: url.to_string(),
            status,
            body,
        })
    }
}

/// How responses are judged. Checks run in field order after the
/// connectivity retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    pub allow_errors: bool,
    pub connection_max_tries: usize,
    pub expected_status_codes: Vec<u16>,
    pub expected_validation_str: Option<String>,
    pub expected_error_str: Option<String>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            allow_errors: false,
            connection_max_tries: 10,
            expected_status_codes: vec![200],
            expected_validation_str: None,
            expected_error_str: None,
        }
    }
}

impl ErrorPolicy {
    fn classify(&self, page: &Page) -> Result<(), RequestError> {
        // An empty list means plain 200.
        let expected: &[u16] = if self.expected_status_codes.is_empty() {
            &[200]
        } else {
            &self.expected_status_codes
        };
        if !expected.contains(&page.status) {
            return Err(RequestError::InvalidStatusCode {
                url: page.url.clone(),
                status: page.status,
            });
        }
        if let Some(validation) = &self.expected_validation_str {
            if !page.body.contains(validation.as_str()) {
                return Err(RequestError::NoValidationString { url: page.url.clone() });
            }
        }
        if let Some(error_str) = &self.expected_error_str {
            if page.body.contains(error_str.as_str()) {
                return Err(RequestError::ContainsErrorString { url: page.url.clone() });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub url: String,
    pub error: RequestError,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HandlerOutput {
    pub responses: Vec<Page>,
    pub failures: Vec<RequestFailure>,
}

/// Fetches a list of URLs one after another on the calling thread.
pub struct RequestHandler {
    fetcher: Arc<dyn PageFetcher>,
    method: Method,
    body: Option<String>,
    policy: ErrorPolicy,
}

impl RequestHandler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, method: Method, body: Option<String>, policy: ErrorPolicy) -> Self {
        Self {
            fetcher,
            method,
            body,
            policy,
        }
    }

    fn fetch_with_retry(&self, url: &str) -> Result<Page, RequestError> {
        let mut tries = 0;
        loop {
            match self.fetcher.fetch(self.method, url, self.body.as_deref()) {
                Err(RequestError::Connectivity { .. })
                    if self.policy.allow_errors && tries < self.policy.connection_max_tries =>
                {
                    tries += 1;
                    debug!("connectivity error on {}, retry {}/{}", url, tries, self.policy.connection_max_tries);
                }
                other => return other,
            }
        }
    }

    /// Fetches and classifies one URL.
    pub fn handle_url(&self, url: &str) -> Result<Page, RequestError> {
        let page = self.fetch_with_retry(url)?;
        self.policy.classify(&page)?;
        Ok(page)
    }

    /// With `allow_errors` every failure is recorded and the walk goes on;
    /// otherwise the first failure is returned.
    pub fn run(&self, urls: &[String]) -> Result<HandlerOutput, RequestError> {
        let mut output = HandlerOutput::default();
        for url in urls {
            match self.handle_url(url) {
                Ok(page) => output.responses.push(page),
                Err(error) if self.policy.allow_errors => {
                    debug!("recording failure for {}: {}", url, error);
                    output.failures.push(RequestFailure {
                        url: url.clone(),
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
        }
        Ok(output)
    }
}

/// Splits `urls` round-robin into at most `parts` non-empty lists.
pub fn partition(urls: &[String], parts: usize) -> Vec<Vec<String>> {
    let parts = parts.clamp(1, urls.len().max(1));
    let mut lists = vec![Vec::new(); parts];
    for (i, url) in urls.iter().enumerate() {
        lists[i % parts].push(url.clone());
    }
    lists.retain(|l| !l.is_empty());
    lists
}

/// Fans a URL list out over a worker pool and re-runs failed URLs for a
/// bounded number of extra passes.
pub struct ThreadedRequestHandler {
    handler: Arc<RequestHandler>,
    threads: usize,
    max_passes: usize,
    sleep_pass: Duration,
}

impl ThreadedRequestHandler {
    pub fn new(handler: RequestHandler, threads: usize, max_passes: usize, sleep_pass: Duration) -> Self {
        Self {
            handler: Arc::new(handler),
            threads,
            max_passes,
            sleep_pass,
        }
    }

    pub fn run(&self, urls: Vec<String>) -> Result<HandlerOutput, RequestError> {
        if urls.is_empty() {
            return Ok(HandlerOutput::default());
        }

        let pool = WorkerPool::new(self.threads.min(urls.len()))?;
        let mut responses = Vec::new();
        let mut pending = urls;
        let mut pass = 0;

        loop {
            let tasks: Vec<Task<Result<HandlerOutput, RequestError>>> =
                partition(&pending, pool.size())
                    .into_iter()
                    .map(|chunk| {
                        let handler = Arc::clone(&self.handler);
                        Box::new(move || handler.run(&chunk)) as Task<_>
                    })
                    .collect();

            let mut failures = Vec::new();
            for output in pool.run_all(tasks)? {
                let output = output?;
                responses.extend(output.responses);
                failures.extend(output.failures);
            }

            if failures.is_empty() {
                return Ok(HandlerOutput { responses, failures });
            }
            if pass >= self.max_passes {
                warn!("{} urls still failing after {} extra passes", failures.len(), pass);
                return Ok(HandlerOutput { responses, failures });
            }

            pass += 1;
            info!("pass {}: retrying {} failed urls", pass, failures.len());
            pending = failures.into_iter().map(|f| f.url).collect();
            thread::sleep(self.sleep_pass);
        }
    }
}
