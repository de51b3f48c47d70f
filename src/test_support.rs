use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::errors::RequestError;
use crate::scraper::request::{Method, Page, PageFetcher};

/// Scripted fetcher. Each URL has a queue of replies; the last reply is
/// repeated once the queue is down to one entry. Unknown URLs fail with a
/// connectivity error.
#[derive(Default)]
pub struct FakeFetcher {
    replies: Mutex<HashMap<String, VecDeque<Result<Page, RequestError>>>>,
    calls: Mutex<Vec<(Method, String)>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, status: u16, body: &str) -> Self {
        self.reply(
            url,
            Ok(Page {
                url: url.to_string(),
                status,
                body: body.to_string(),
            }),
        )
    }

    pub fn unreachable(self, url: &str) -> Self {
        self.reply(url, Err(RequestError::Connectivity { url: url.to_string() }))
    }

    pub fn reply(self, url: &str, reply: Result<Page, RequestError>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, u)| u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn methods(&self) -> Vec<Method> {
        self.calls.lock().unwrap().iter().map(|(m, _)| *m).collect()
    }
}

impl PageFetcher for FakeFetcher {
    fn fetch(&self, method: Method, url: &str, _body: Option<&str>) -> Result<Page, RequestError> {
        self.calls.lock().unwrap().push((method, url.to_string()));
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap(),
            None => Err(RequestError::Connectivity { url: url.to_string() }),
        }
    }
}

pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub published: String,
    pub description: Option<String>,
}

impl FeedEntry {
    pub fn new(id: &str, published: &str) -> Self {
        Self {
            id: id.to_string(),
            title: format!("Video {}", id),
            published: published.to_string(),
            description: Some(format!("About {}", id)),
        }
    }

    pub fn without_description(mut self) -> Self {
        self.description = None;
        self
    }
}

/// Builds a channel feed document shaped like the ones YouTube serves.
/// Entries are emitted in the given order, which callers keep newest first.
pub fn feed_xml(channel_id: &str, channel_name: &str, entries: &[FeedEntry]) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
 <link rel="self" href="http://www.youtube.com/feeds/videos.xml?channel_id={id}"/>
 <id>yt:channel:{id}</id>
 <yt:channelId>{id}</yt:channelId>
 <title>{name}</title>
 <link rel="alternate" href="https://www.youtube.com/channel/{id}"/>
 <author>
  <name>{name}</name>
  <uri>https://www.youtube.com/channel/{id}</uri>
 </author>
 <published>2015-03-01T12:00:00+00:00</published>
"#,
        id = channel_id,
        name = channel_name
    );

    for entry in entries {
        let description = entry
            .description
            .as_ref()
            .map(|d| format!("   <media:description>{}</media:description>\n", d))
            .unwrap_or_default();
        xml.push_str(&format!(
            r#" <entry>
  <id>yt:video:{vid}</id>
  <yt:videoId>{vid}</yt:videoId>
  <yt:channelId>{cid}</yt:channelId>
  <title>{title}</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v={vid}"/>
  <author>
   <name>{name}</name>
   <uri>https://www.youtube.com/channel/{cid}</uri>
  </author>
  <published>{published}</published>
  <updated>{published}</updated>
  <media:group>
   <media:title>{title}</media:title>
   <media:content url="https://www.youtube.com/v/{vid}?version=3" type="application/x-shockwave-flash" width="640" height="390"/>
   <media:thumbnail url="https://i4.ytimg.com/vi/{vid}/hqdefault.jpg" width="480" height="360"/>
{description}  </media:group>
 </entry>
"#,
            vid = entry.id,
            cid = channel_id,
            title = entry.title,
            name = channel_name,
            published = entry.published,
            description = description,
        ));
    }

    xml.push_str("</feed>\n");
    xml
}

/// Channel page carrying the `channelId` meta tag and an avatar URL.
pub fn channel_page(channel_id: &str) -> String {
    format!(
        r#"<html><head><meta itemprop="channelId" content="{id}"></head>
<body><script>var ytInitialData = {{"avatar":{{"thumbnails":[{{"url":"https://yt3.ggpht.com/ytc/avatar-{id}=s48-c-k-c0x00ffffff-no-rj","width":48}}]}}}};</script></body></html>"#,
        id = channel_id
    )
}
