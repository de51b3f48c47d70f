pub mod models;
pub mod schema;
pub mod sqlite;

use crate::errors::StorageResult;
use models::{Channel, NewVideo, SearchField, Video, VideoKind};

/// Persistence for channels and their videos.
///
/// Lookups of a single entity fail with `ObjectDoesNotExist`, inserts of a
/// duplicate id with `ObjectAlreadyExists`.
pub trait SubscriptionStorage {
    fn add_channel(&self, id: &str, name: &str, url: &str, thumbnail: &str) -> StorageResult<()>;
    fn get_channel(&self, id: &str) -> StorageResult<Channel>;
    fn remove_channel(&self, id: &str) -> StorageResult<()>;
    fn find_channels(&self, name: &str) -> StorageResult<Vec<Channel>>;
    fn get_all_channels(&self) -> StorageResult<Vec<Channel>>;
    fn set_channel_notify_status(&self, id: &str, notify_on: bool) -> StorageResult<()>;

    /// Inserts a video, evicting the channel's oldest videos first when it is
    /// at the configured maximum. With `deferred_commit` the insert is left
    /// pending until `commit` is called.
    fn add_video(
        &self,
        video: &NewVideo,
        new: bool,
        watched: bool,
        deferred_commit: bool,
    ) -> StorageResult<()>;
    fn remove_video(&self, id: &str) -> StorageResult<()>;
    fn get_video(&self, id: &str) -> StorageResult<Video>;
    fn find_video_by(
        &self,
        term: &str,
        field: SearchField,
        channel_id: Option<&str>,
    ) -> StorageResult<Vec<Video>>;
    fn get_all_videos(&self, channel_id: Option<&str>) -> StorageResult<Vec<Video>>;
    fn get_all_new_videos(&self, channel_id: Option<&str>) -> StorageResult<Vec<Video>>;
    fn get_all_unwatched_videos(&self, channel_id: Option<&str>) -> StorageResult<Vec<Video>>;
    fn get_all_videos_by_date_range(
        &self,
        date_min: &str,
        date_max: &str,
        channel_id: Option<&str>,
    ) -> StorageResult<Vec<Video>>;

    fn mark_video_old(&self, id: &str) -> StorageResult<()>;
    fn mark_all_videos_old(&self, channel_id: &str) -> StorageResult<()>;
    fn mark_video_watched(&self, id: &str) -> StorageResult<()>;
    fn mark_all_videos_watched(&self, channel_id: &str) -> StorageResult<()>;

    /// Newest video of the channel by pubdate, `None` when it has no videos.
    fn get_newest_video(&self, channel_id: &str) -> StorageResult<Option<Video>>;
    fn get_oldest_video(&self, channel_id: &str) -> StorageResult<Option<Video>>;
    fn amt_channel_videos(&self, channel_id: &str, kind: VideoKind) -> StorageResult<i64>;

    /// Changes the retention bound applied by subsequent inserts.
    fn set_max_videos_per_channel(&self, max: usize);

    fn commit(&self) -> StorageResult<()>;
}
