pub mod extract;
pub mod pool;
pub mod request;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use url::Url;

use crate::config::RequestSettings;
use crate::errors::{RequestError, ScraperError};
use crate::storage::models::NewVideo;
use extract::ChannelInfo;
use request::{
    ErrorPolicy, HandlerOutput, Method, Page, PageFetcher, RequestHandler, ThreadedRequestHandler,
    UreqFetcher,
};

pub const RSS_BASE_URL: &str = "https://www.youtube.com/feeds/videos.xml?channel_id=";

const SUPPORTED_URL_TYPES: [&str; 5] = [
    "youtube.com/watch?v=",
    "youtube.com/channel/",
    "youtube.com/user/",
    "youtube.com/c/",
    "youtube.com/@",
];

/// Outcome of one channel in a bulk feed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    Success { channel_id: String, videos: Vec<NewVideo> },
    Error { channel_id: String, error: ScraperError },
}

impl FeedOutcome {
    pub fn channel_id(&self) -> &str {
        match self {
            FeedOutcome::Success { channel_id, .. } | FeedOutcome::Error { channel_id, .. } => {
                channel_id
            }
        }
    }
}

pub fn feed_url(channel_id: &str) -> String {
    format!("{}{}", RSS_BASE_URL, channel_id)
}

/// Forces `https://` onto a URL.
pub fn fix_schema(url: &str) -> String {
    if url.starts_with("https://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{}", rest)
    } else {
        format!("https://{}", url)
    }
}

pub fn validate_url(url: &str) -> Result<(), ScraperError> {
    if !url.contains("youtube.com") {
        return Err(ScraperError::UrlNotYouTube(url.to_string()));
    }
    if !SUPPORTED_URL_TYPES.iter().any(|t| url.contains(t)) {
        return Err(ScraperError::UrlNotSupported(url.to_string()));
    }
    Ok(())
}

fn channel_id_from_feed_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| *key == "channel_id")
        .map(|(_, value)| value.into_owned())
}

/// Talks to YouTube: resolves channel URLs and fetches channel feeds.
///
/// The feed fetched while reading channel information is cached per channel
/// so the first update after adding a channel can skip the network.
pub struct YtScraper {
    fetcher: Arc<dyn PageFetcher>,
    settings: RequestSettings,
    cache: HashMap<String, String>,
}

impl YtScraper {
    pub fn new(settings: RequestSettings) -> Self {
        let fetcher = Arc::new(UreqFetcher::new(settings.timeout()));
        Self::with_fetcher(fetcher, settings)
    }

    pub fn with_fetcher(fetcher: Arc<dyn PageFetcher>, settings: RequestSettings) -> Self {
        Self {
            fetcher,
            settings,
            cache: HashMap::new(),
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    // --- Request helpers ---

    fn handler(&self, method: Method, body: Option<String>, policy: ErrorPolicy) -> RequestHandler {
        RequestHandler::new(Arc::clone(&self.fetcher), method, body, policy)
    }

    fn threaded(&self, handler: RequestHandler) -> ThreadedRequestHandler {
        ThreadedRequestHandler::new(
            handler,
            self.settings.threads,
            self.settings.max_passes,
            self.settings.sleep_pass(),
        )
    }

    fn bulk_policy(&self, expected_status_codes: Vec<u16>, validation: Option<&str>) -> ErrorPolicy {
        ErrorPolicy {
            allow_errors: true,
            connection_max_tries: self.settings.connection_max_tries,
            expected_status_codes,
            expected_validation_str: validation.map(str::to_string),
            expected_error_str: None,
        }
    }

    /// Synchronous GET; any classified error is returned as is.
    pub fn make_unique_query(&self, url: &str) -> Result<Page, RequestError> {
        let policy = ErrorPolicy {
            allow_errors: false,
            connection_max_tries: self.settings.connection_max_tries,
            expected_status_codes: vec![200],
            ..ErrorPolicy::default()
        };
        self.handler(Method::Get, None, policy).handle_url(url)
    }

    pub fn make_unique_post(&self, url: &str, body: &str) -> Result<Page, RequestError> {
        let policy = ErrorPolicy {
            allow_errors: false,
            connection_max_tries: self.settings.connection_max_tries,
            expected_status_codes: vec![200, 201],
            ..ErrorPolicy::default()
        };
        self.handler(Method::Post, Some(body.to_string()), policy).handle_url(url)
    }

    pub fn make_bulk_queries(&self, urls: Vec<String>, validation: Option<&str>) -> Result<HandlerOutput, RequestError> {
        let policy = self.bulk_policy(vec![200], validation);
        self.threaded(self.handler(Method::Get, None, policy)).run(urls)
    }

    pub fn make_bulk_posts(&self, urls: Vec<String>, body: &str) -> Result<HandlerOutput, RequestError> {
        let policy = self.bulk_policy(vec![200, 201], None);
        self.threaded(self.handler(Method::Post, Some(body.to_string()), policy)).run(urls)
    }

    // --- YouTube operations ---

    /// Resolves a channel or video URL to `(channel_id, thumbnail_url)`.
    pub fn get_channel_id_and_thumbnail_from_url(&self, url: &str) -> Result<(String, String), ScraperError> {
        validate_url(url)?;
        let url = fix_schema(url);
        debug!("resolving channel from {}", url);
        let page = self.make_unique_query(&url)?;
        let channel_id = extract::extract_channel_id(&page.body, &url)?;
        let thumbnail = extract::extract_channel_thumbnail(&page.body, &url)?;
        Ok((channel_id, thumbnail))
    }

    /// Fetches the channel feed, caches it and reads the channel's name and
    /// URL from it.
    pub fn get_channel_information(&mut self, channel_id: &str) -> Result<ChannelInfo, ScraperError> {
        let page = self.make_unique_query(&feed_url(channel_id))?;
        let info = extract::extract_channel_info(&page.body, channel_id)?;
        self.cache.insert(channel_id.to_string(), page.body);
        Ok(info)
    }

    /// Video records of one channel, newest first as served. With
    /// `use_cache` the feed must already be cached.
    pub fn get_video_list(&self, channel_id: &str, use_cache: bool) -> Result<Vec<NewVideo>, ScraperError> {
        if use_cache {
            let xml = self
                .cache
                .get(channel_id)
                .ok_or_else(|| ScraperError::CacheMiss(channel_id.to_string()))?;
            return extract::extract_video_list(xml, channel_id);
        }
        let page = self.make_unique_query(&feed_url(channel_id))?;
        extract::extract_video_list(&page.body, channel_id)
    }

    /// Fetches every channel's feed concurrently. Each channel gets an
    /// outcome of its own; one bad feed never hides the others.
    pub fn get_video_list_multiple(&self, channel_ids: &[String]) -> Result<Vec<FeedOutcome>, ScraperError> {
        let urls: Vec<String> = channel_ids.iter().map(|id| feed_url(id)).collect();
        info!("fetching {} channel feeds", urls.len());
        let output = self.make_bulk_queries(urls, None)?;

        let mut outcomes = Vec::with_capacity(channel_ids.len());
        for page in output.responses {
            let Some(channel_id) = channel_id_from_feed_url(&page.url) else {
                warn!("response for unknown feed url {}", page.url);
                continue;
            };
            let outcome = match extract::extract_video_list(&page.body, &channel_id) {
                Ok(videos) => FeedOutcome::Success { channel_id, videos },
                Err(error) => FeedOutcome::Error { channel_id, error },
            };
            outcomes.push(outcome);
        }
        for failure in output.failures {
            let Some(channel_id) = channel_id_from_feed_url(&failure.url) else {
                warn!("failure for unknown feed url {}", failure.url);
                continue;
            };
            outcomes.push(FeedOutcome::Error {
                channel_id,
                error: failure.error.into(),
            });
        }
        Ok(outcomes)
    }
}
