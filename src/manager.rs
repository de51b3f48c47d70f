use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Serialize;

use crate::errors::{Result, ScraperError, StorageError, YtsmError};
use crate::scraper::{FeedOutcome, YtScraper};
use crate::storage::models::{Channel, NewVideo, SearchField, Video, VideoCounts, VideoKind};
use crate::storage::SubscriptionStorage;

/// Result of one pass over every subscribed channel.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub total: usize,
    /// New videos per channel that was fetched and parsed successfully.
    pub new_per_channel: BTreeMap<String, usize>,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: BTreeMap<String, ScraperError>,
}

fn serialize_errors<S: serde::Serializer>(
    errors: &BTreeMap<String, ScraperError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(errors.iter().map(|(id, e)| (id, e.to_string())))
}

fn channel_not_found(id: &str) -> impl Fn(StorageError) -> YtsmError + '_ {
    move |e| match e {
        StorageError::ObjectDoesNotExist(_) => YtsmError::ChannelDoesNotExist(id.to_string()),
        other => other.into(),
    }
}

fn video_not_found(id: &str) -> impl Fn(StorageError) -> YtsmError + '_ {
    move |e| match e {
        StorageError::ObjectDoesNotExist(_) => YtsmError::VideoDoesNotExist(id.to_string()),
        other => other.into(),
    }
}

/// Ties the scraper to storage: subscribes to channels and pulls their new
/// videos in.
pub struct YtSubManager<S: SubscriptionStorage> {
    storage: S,
    scraper: YtScraper,
}

impl<S: SubscriptionStorage> YtSubManager<S> {
    pub fn new(storage: S, scraper: YtScraper) -> Self {
        Self { storage, scraper }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // --- Updates ---

    /// Subscribes to the channel behind `url` and stores its current videos.
    /// Returns the channel id.
    pub fn add_channel(&mut self, url: &str) -> Result<String> {
        let (channel_id, thumbnail) = self.scraper.get_channel_id_and_thumbnail_from_url(url)?;
        match self.storage.get_channel(&channel_id) {
            Ok(_) => return Err(YtsmError::ChannelAlreadyExists(channel_id)),
            Err(StorageError::ObjectDoesNotExist(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let info = self.scraper.get_channel_information(&channel_id)?;
        self.storage
            .add_channel(&channel_id, &info.name, &info.url, &thumbnail)
            .map_err(|e| match e {
                StorageError::ObjectAlreadyExists(_) => {
                    YtsmError::ChannelAlreadyExists(channel_id.clone())
                }
                other => other.into(),
            })?;
        info!("added channel {} ({})", info.name, channel_id);

        self.update_channel(&channel_id, true)?;
        Ok(channel_id)
    }

    /// Fetches one channel's feed and stores the videos newer than the
    /// newest one already known. Returns how many were added.
    pub fn update_channel(&mut self, channel_id: &str, use_cache: bool) -> Result<usize> {
        self.storage.get_channel(channel_id).map_err(channel_not_found(channel_id))?;
        let videos = self.scraper.get_video_list(channel_id, use_cache)?;
        self.update_video_list(&videos, channel_id)
    }

    /// Fetches every channel concurrently. A channel whose fetch or parse
    /// failed is reported in `errors` and does not stop the others.
    pub fn update_all_channels(&mut self) -> Result<UpdateSummary> {
        let channel_ids: Vec<String> = self
            .storage
            .get_all_channels()?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut summary = UpdateSummary::default();
        if channel_ids.is_empty() {
            return Ok(summary);
        }

        for outcome in self.scraper.get_video_list_multiple(&channel_ids)? {
            match outcome {
                FeedOutcome::Success { channel_id, videos } => {
                    let added = self.update_video_list(&videos, &channel_id)?;
                    summary.total += added;
                    summary.new_per_channel.insert(channel_id, added);
                }
                FeedOutcome::Error { channel_id, error } => {
                    warn!("could not update {}: {}", channel_id, error);
                    summary.errors.insert(channel_id, error);
                }
            }
        }
        info!(
            "update finished: {} new videos, {} channels failed",
            summary.total,
            summary.errors.len()
        );
        Ok(summary)
    }

    /// Inserts `videos` (newest first) up to, but not including, the
    /// channel's newest stored video. A channel with no videos takes the
    /// whole list. Everything is committed once at the end.
    fn update_video_list(&self, videos: &[NewVideo], channel_id: &str) -> Result<usize> {
        let newest = self
            .storage
            .get_newest_video(channel_id)
            .map_err(channel_not_found(channel_id))?
            .map(|v| v.id);
        let result = self.insert_until(videos, channel_id, newest.as_deref());
        self.storage.commit()?;
        let added = result?;
        debug!("{}: {} new videos", channel_id, added);
        Ok(added)
    }

    fn insert_until(&self, videos: &[NewVideo], channel_id: &str, stop_at: Option<&str>) -> Result<usize> {
        let mut added = 0;
        for video in videos {
            if stop_at == Some(video.id.as_str()) {
                break;
            }
            match self.storage.add_video(video, true, false, true) {
                Ok(()) => added += 1,
                Err(StorageError::ObjectAlreadyExists(id)) => {
                    debug!("video {} already stored, skipping", id);
                }
                Err(StorageError::ObjectDoesNotExist(_)) => {
                    return Err(YtsmError::ChannelDoesNotExist(channel_id.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(added)
    }

    // --- Channels ---

    pub fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        self.storage.get_channel(channel_id).map_err(channel_not_found(channel_id))
    }

    pub fn remove_channel(&self, channel_id: &str) -> Result<()> {
        self.storage.remove_channel(channel_id).map_err(channel_not_found(channel_id))?;
        info!("removed channel {}", channel_id);
        Ok(())
    }

    pub fn find_channels(&self, name: &str) -> Result<Vec<Channel>> {
        Ok(self.storage.find_channels(name)?)
    }

    pub fn get_all_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.storage.get_all_channels()?)
    }

    pub fn set_notify(&self, channel_id: &str, notify_on: bool) -> Result<()> {
        self.storage
            .set_channel_notify_status(channel_id, notify_on)
            .map_err(channel_not_found(channel_id))
    }

    // --- Videos ---

    pub fn get_video(&self, video_id: &str) -> Result<Video> {
        self.storage.get_video(video_id).map_err(video_not_found(video_id))
    }

    pub fn remove_video(&self, video_id: &str) -> Result<()> {
        self.storage.remove_video(video_id).map_err(video_not_found(video_id))
    }

    pub fn find_video_by_name(&self, term: &str, channel_id: Option<&str>) -> Result<Vec<Video>> {
        Ok(self.storage.find_video_by(term, SearchField::Name, channel_id)?)
    }

    pub fn find_video_by_description(&self, term: &str, channel_id: Option<&str>) -> Result<Vec<Video>> {
        Ok(self.storage.find_video_by(term, SearchField::Description, channel_id)?)
    }

    pub fn get_videos(&self, kind: VideoKind, channel_id: Option<&str>) -> Result<Vec<Video>> {
        if let Some(id) = channel_id {
            self.get_channel(id)?;
        }
        let videos = match kind {
            VideoKind::All => self.storage.get_all_videos(channel_id)?,
            VideoKind::New => self.storage.get_all_new_videos(channel_id)?,
            VideoKind::Unwatched => self.storage.get_all_unwatched_videos(channel_id)?,
        };
        Ok(videos)
    }

    pub fn get_videos_by_date_range(
        &self,
        date_min: &str,
        date_max: &str,
        channel_id: Option<&str>,
    ) -> Result<Vec<Video>> {
        Ok(self.storage.get_all_videos_by_date_range(date_min, date_max, channel_id)?)
    }

    pub fn mark_video_old(&self, video_id: &str) -> Result<()> {
        self.storage.mark_video_old(video_id).map_err(video_not_found(video_id))
    }

    pub fn mark_all_videos_old(&self, channel_id: &str) -> Result<()> {
        self.storage.mark_all_videos_old(channel_id).map_err(channel_not_found(channel_id))
    }

    pub fn mark_video_watched(&self, video_id: &str) -> Result<()> {
        self.storage.mark_video_watched(video_id).map_err(video_not_found(video_id))
    }

    pub fn mark_all_videos_watched(&self, channel_id: &str) -> Result<()> {
        self.storage
            .mark_all_videos_watched(channel_id)
            .map_err(channel_not_found(channel_id))
    }

    pub fn get_amt_videos(&self, channel_id: &str) -> Result<VideoCounts> {
        self.get_channel(channel_id)?;
        Ok(VideoCounts {
            all: self.storage.amt_channel_videos(channel_id, VideoKind::All)?,
            new: self.storage.amt_channel_videos(channel_id, VideoKind::New)?,
            unwatched: self.storage.amt_channel_videos(channel_id, VideoKind::Unwatched)?,
        })
    }

    pub fn set_max_videos_per_channel(&self, max: usize) {
        self.storage.set_max_videos_per_channel(max);
    }
}
