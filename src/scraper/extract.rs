use std::sync::LazyLock;

use atom_syndication::extension::{Extension, ExtensionMap};
use atom_syndication::{Entry, Feed};
use regex::Regex;

use crate::errors::ScraperError;
use crate::storage::models::NewVideo;

/// Cookie consent host YouTube redirects to in some regions.
pub const REGION_BLOCK_MARKER: &str = "consent.youtube.com";

static CHANNEL_ID_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"channelId" content="(?P<channel_id>[\w\-]+)""#).expect("channel id regex")
});

static CHANNEL_ID_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:channelId|externalId)":"(?P<channel_id>UC[\w\-]{22})""#)
        .expect("channel id json regex")
});

static CHANNEL_THUMBNAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""url":"https://yt3(?P<channel_thumbnail>[\w\-./_:]+)="#).expect("thumbnail regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub url: String,
}

/// Channel id from a channel or video page. The `channelId` meta tag is
/// tried first, then the id embedded in the page's JSON.
pub fn extract_channel_id(html: &str, source_url: &str) -> Result<String, ScraperError> {
    let captures = CHANNEL_ID_META
        .captures(html)
        .or_else(|| CHANNEL_ID_JSON.captures(html));
    if let Some(id) = captures.and_then(|c| c.name("channel_id")) {
        return Ok(id.as_str().to_string());
    }
    if html.contains(REGION_BLOCK_MARKER) {
        return Err(ScraperError::RegionBlocked(source_url.to_string()));
    }
    Err(ScraperError::ChannelIdParsing(source_url.to_string()))
}

pub fn extract_channel_thumbnail(html: &str, source_url: &str) -> Result<String, ScraperError> {
    CHANNEL_THUMBNAIL
        .captures(html)
        .and_then(|c| c.name("channel_thumbnail"))
        .map(|m| format!("https://yt3{}", m.as_str()))
        .ok_or_else(|| ScraperError::ChannelThumbnailParsing(source_url.to_string()))
}

pub fn extract_channel_info(xml: &str, channel_id: &str) -> Result<ChannelInfo, ScraperError> {
    let err = || ScraperError::ChannelInfoParsing(channel_id.to_string());
    let feed = Feed::read_from(xml.as_bytes()).map_err(|_| err())?;
    let author = feed.authors().first().ok_or_else(err)?;
    let url = author.uri().ok_or_else(err)?;
    if author.name().is_empty() {
        return Err(err());
    }
    Ok(ChannelInfo {
        id: channel_id.to_string(),
        name: author.name().to_string(),
        url: url.to_string(),
    })
}

/// Every entry of the feed, in feed order. One malformed entry fails the
/// whole list.
pub fn extract_video_list(xml: &str, channel_id: &str) -> Result<Vec<NewVideo>, ScraperError> {
    let err = || ScraperError::VideoListParsing(channel_id.to_string());
    let feed = Feed::read_from(xml.as_bytes()).map_err(|_| err())?;
    feed.entries()
        .iter()
        .map(|entry| entry_to_video(entry, channel_id).ok_or_else(err))
        .collect()
}

fn first_extension<'a>(exts: &'a ExtensionMap, ns: &str, name: &str) -> Option<&'a Extension> {
    exts.get(ns)?.get(name)?.first()
}

fn first_child<'a>(ext: &'a Extension, name: &str) -> Option<&'a Extension> {
    ext.children().get(name)?.first()
}

fn entry_to_video(entry: &Entry, channel_id: &str) -> Option<NewVideo> {
    let exts = entry.extensions();
    let id = first_extension(exts, "yt", "videoId")?.value()?;
    let group = first_extension(exts, "media", "group")?;
    let description = first_child(group, "description")?.value().unwrap_or_default();
    let thumbnail = first_child(group, "thumbnail")?.attrs().get("url")?;

    let name = entry.title().value.as_str();
    if name.is_empty() {
        return None;
    }
    let url = entry
        .links()
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| entry.links().first())?
        .href();
    let pubdate = entry.published()?.to_rfc3339();

    Some(NewVideo {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        name: name.to_string(),
        url: url.to_string(),
        pubdate,
        description: description.to_string(),
        thumbnail: thumbnail.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{channel_page, feed_xml, FeedEntry};

    const CHANNEL: &str = "UCupvZG-5ko_eiXAupbDfxWw";

    // --- Channel id ---

    #[test]
    fn test_channel_id_from_meta_tag() {
        let html = channel_page(CHANNEL);
        assert_eq!(extract_channel_id(&html, "src").unwrap(), CHANNEL);
    }

    #[test]
    fn test_channel_id_from_page_json() {
        let html = format!(r#"<script>{{"videoDetails":{{"channelId":"{}","title":"x"}}}}</script>"#, CHANNEL);
        assert_eq!(extract_channel_id(&html, "src").unwrap(), CHANNEL);
    }

    #[test]
    fn test_channel_id_missing() {
        assert_eq!(
            extract_channel_id("<html></html>", "https://www.youtube.com/c/x"),
            Err(ScraperError::ChannelIdParsing("https://www.youtube.com/c/x".to_string()))
        );
    }

    #[test]
    fn test_region_blocked() {
        let html = r#"<form action="https://consent.youtube.com/save"></form>"#;
        assert!(matches!(extract_channel_id(html, "src"), Err(ScraperError::RegionBlocked(_))));
    }

    // --- Thumbnail ---

    #[test]
    fn test_channel_thumbnail() {
        let html = channel_page(CHANNEL);
        assert_eq!(
            extract_channel_thumbnail(&html, "src").unwrap(),
            format!("https://yt3.ggpht.com/ytc/avatar-{}", CHANNEL)
        );
    }

    #[test]
    fn test_channel_thumbnail_missing() {
        assert!(matches!(
            extract_channel_thumbnail(r#"{"url":"https://i.ytimg.com/x.jpg"}"#, "src"),
            Err(ScraperError::ChannelThumbnailParsing(_))
        ));
    }

    // --- Channel info ---

    #[test]
    fn test_channel_info() {
        let xml = feed_xml(CHANNEL, "CNN", &[]);
        let info = extract_channel_info(&xml, CHANNEL).unwrap();
        assert_eq!(info.id, CHANNEL);
        assert_eq!(info.name, "CNN");
        assert_eq!(info.url, format!("https://www.youtube.com/channel/{}", CHANNEL));
    }

    #[test]
    fn test_channel_info_not_a_feed() {
        assert_eq!(
            extract_channel_info("<html>oops</html>", CHANNEL),
            Err(ScraperError::ChannelInfoParsing(CHANNEL.to_string()))
        );
    }

    // --- Video list ---

    #[test]
    fn test_video_list_in_feed_order() {
        let xml = feed_xml(
            CHANNEL,
            "CNN",
            &[
                FeedEntry::new("v2", "2021-03-02T10:00:00+00:00"),
                FeedEntry::new("v1", "2021-03-01T10:00:00+00:00"),
            ],
        );
        let videos = extract_video_list(&xml, CHANNEL).unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].id, "v2");
        assert_eq!(videos[1].id, "v1");

        let v = &videos[0];
        assert_eq!(v.channel_id, CHANNEL);
        assert_eq!(v.name, "Video v2");
        assert_eq!(v.url, "https://www.youtube.com/watch?v=v2");
        assert_eq!(v.description, "About v2");
        assert_eq!(v.thumbnail, "https://i4.ytimg.com/vi/v2/hqdefault.jpg");
        assert!(v.pubdate.starts_with("2021-03-02T10:00:00"));
    }

    #[test]
    fn test_video_list_empty_feed() {
        let xml = feed_xml(CHANNEL, "CNN", &[]);
        assert!(extract_video_list(&xml, CHANNEL).unwrap().is_empty());
    }

    #[test]
    fn test_missing_field_fails_whole_list() {
        let xml = feed_xml(
            CHANNEL,
            "CNN",
            &[
                FeedEntry::new("v2", "2021-03-02T10:00:00+00:00"),
                FeedEntry::new("v1", "2021-03-01T10:00:00+00:00").without_description(),
            ],
        );
        assert_eq!(
            extract_video_list(&xml, CHANNEL),
            Err(ScraperError::VideoListParsing(CHANNEL.to_string()))
        );
    }

    #[test]
    fn test_video_list_garbage() {
        assert_eq!(
            extract_video_list("not xml at all", CHANNEL),
            Err(ScraperError::VideoListParsing(CHANNEL.to_string()))
        );
    }
}
