use thiserror::Error;

/// Failures produced by the transport layer for a single URL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("Connectivity error: {url}")]
    Connectivity { url: String },

    #[error("Invalid status code {status}: {url}")]
    InvalidStatusCode { url: String, status: u16 },

    #[error("Response is missing the validation string: {url}")]
    NoValidationString { url: String },

    #[error("Response contains the error string: {url}")]
    ContainsErrorString { url: String },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScraperError {
    #[error("Cache does not have key: {0}")]
    CacheMiss(String),

    #[error("URL is not a YouTube URL: {0}")]
    UrlNotYouTube(String),

    #[error("YouTube URL is not supported: {0}")]
    UrlNotSupported(String),

    #[error("YouTube URL returned 404: {0}")]
    NotFound(String),

    #[error("YouTube URL returned unexpected status code {status}: {url}")]
    UnexpectedStatusCode { url: String, status: u16 },

    #[error("Error getting URL: {0}")]
    Getting(RequestError),

    #[error("Could not parse channel id from: {0}")]
    ChannelIdParsing(String),

    #[error("Region blocked, redirected to the cookie consent page: {0}")]
    RegionBlocked(String),

    #[error("Could not parse channel thumbnail from: {0}")]
    ChannelThumbnailParsing(String),

    #[error("Could not parse channel information for: {0}")]
    ChannelInfoParsing(String),

    #[error("Could not parse video list for: {0}")]
    VideoListParsing(String),
}

impl From<RequestError> for ScraperError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::InvalidStatusCode { url, status: 404 } => ScraperError::NotFound(url),
            RequestError::InvalidStatusCode { url, status } => {
                ScraperError::UnexpectedStatusCode { url, status }
            }
            other => ScraperError::Getting(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Object already exists: {0}")]
    ObjectAlreadyExists(String),

    #[error("Object does not exist: {0}")]
    ObjectDoesNotExist(String),
}

#[derive(Debug, Error)]
pub enum YtsmError {
    #[error("Scraper error: {0}")]
    Scraper(#[from] ScraperError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Channel already exists: {0}")]
    ChannelAlreadyExists(String),

    #[error("Channel does not exist: {0}")]
    ChannelDoesNotExist(String),

    #[error("Video already exists: {0}")]
    VideoAlreadyExists(String),

    #[error("Video does not exist: {0}")]
    VideoDoesNotExist(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for YtsmError {
    fn from(err: rusqlite::Error) -> Self {
        YtsmError::Storage(StorageError::Sqlite(err))
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type Result<T> = std::result::Result<T, YtsmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_404_maps_to_not_found() {
        let err = ScraperError::from(RequestError::InvalidStatusCode {
            url: "https://www.youtube.com/channel/x".to_string(),
            status: 404,
        });
        assert_eq!(err, ScraperError::NotFound("https://www.youtube.com/channel/x".to_string()));
    }

    #[test]
    fn test_other_status_maps_to_unexpected() {
        let err = ScraperError::from(RequestError::InvalidStatusCode {
            url: "u".to_string(),
            status: 500,
        });
        assert!(matches!(err, ScraperError::UnexpectedStatusCode { status: 500, .. }));
    }

    #[test]
    fn test_connectivity_maps_to_getting() {
        let err = ScraperError::from(RequestError::Connectivity { url: "u".to_string() });
        assert!(matches!(err, ScraperError::Getting(RequestError::Connectivity { .. })));
    }
}
