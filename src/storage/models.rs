use chrono::DateTime;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub url: String,
    pub notify_on: bool,
    pub thumbnail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Video {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    pub url: String,
    pub pubdate: String,
    pub description: String,
    pub thumbnail: String,
    pub new: bool,
    pub watched: bool,
}

impl Video {
    /// Publish date trimmed to `YYYY-MM-DD HH:MM`.
    pub fn sensible_pubdate(&self) -> String {
        if let Ok(date) = DateTime::parse_from_rfc3339(&self.pubdate) {
            return date.format("%Y-%m-%d %H:%M").to_string();
        }
        match self.pubdate.split_once('T') {
            Some((date, time)) => {
                let hm: Vec<&str> = time.split(':').take(2).collect();
                format!("{} {}", date, hm.join(":"))
            }
            None => self.pubdate.clone(),
        }
    }
}

/// A video record as parsed from a channel feed, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewVideo {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    pub url: String,
    pub pubdate: String,
    pub description: String,
    pub thumbnail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoKind {
    All,
    New,
    Unwatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Name,
    Description,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoCounts {
    pub all: i64,
    pub new: i64,
    pub unwatched: i64,
}
