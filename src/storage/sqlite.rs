use std::cell::Cell;

use log::debug;
use rusqlite::types::ToSql;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use crate::errors::{StorageError, StorageResult};
use super::SubscriptionStorage;
use super::models::{Channel, NewVideo, SearchField, Video, VideoKind};
use super::schema;

const CHANNEL_SELECT: &str = "SELECT id, name, url, notify_on, thumbnail FROM channels";

const VIDEO_SELECT: &str = "
    SELECT id, channel_id, name, url, pubdate, description, thumbnail, new, watched
    FROM videos
";

pub struct SqliteStorage {
    conn: Connection,
    max_videos_per_channel: Cell<usize>,
}

fn row_to_channel(row: &Row) -> rusqlite::Result<Channel> {
    let notify_int: i32 = row.get(3)?;
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        notify_on: notify_int != 0,
        thumbnail: row.get(4)?,
    })
}

fn row_to_video(row: &Row) -> rusqlite::Result<Video> {
    let new_int: i32 = row.get(7)?;
    let watched_int: i32 = row.get(8)?;
    Ok(Video {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        pubdate: row.get(4)?,
        description: row.get(5)?,
        thumbnail: row.get(6)?,
        new: new_int != 0,
        watched: watched_int != 0,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Escapes `term` for a `LIKE ... ESCAPE '\'` pattern so `%` and `_` match
/// themselves.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn expect_changed(changes: usize, id: &str) -> StorageResult<()> {
    if changes == 0 {
        return Err(StorageError::ObjectDoesNotExist(id.to_string()));
    }
    Ok(())
}

impl SqliteStorage {
    pub fn new(conn: Connection, max_videos_per_channel: usize) -> StorageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute(schema::CREATE_CHANNELS_TABLE, [])?;
        conn.execute(schema::CREATE_VIDEOS_TABLE, [])?;
        conn.execute(schema::CREATE_INDEX_CHANNEL_PUBDATE, [])?;
        conn.execute(schema::CREATE_INDEX_PUBDATE, [])?;
        Ok(Self {
            conn,
            max_videos_per_channel: Cell::new(max_videos_per_channel.max(1)),
        })
    }

    pub fn in_memory(max_videos_per_channel: usize) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn, max_videos_per_channel)
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn query_videos(&self, sql: &str, params: &[&dyn ToSql]) -> StorageResult<Vec<Video>> {
        let mut stmt = self.conn.prepare(sql)?;
        let videos = stmt
            .query_map(params, row_to_video)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(videos)
    }

    /// Runs a video query optionally narrowed to one channel. `condition` is
    /// the WHERE clause without the channel filter.
    fn query_videos_in<'a>(
        &self,
        condition: Option<&str>,
        mut params: Vec<&'a dyn ToSql>,
        channel_id: &'a Option<&'a str>,
    ) -> StorageResult<Vec<Video>> {
        let mut conditions: Vec<&str> = condition.into_iter().collect();
        if let Some(channel_id) = channel_id {
            conditions.push("channel_id = ?");
            params.push(channel_id);
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("{} {} ORDER BY pubdate DESC", VIDEO_SELECT, where_clause);
        self.query_videos(&sql, &params)
    }

    fn ensure_channel(&self, channel_id: &str) -> StorageResult<()> {
        self.get_channel(channel_id).map(|_| ())
    }

    fn video_exists(&self, id: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM videos WHERE id = ?", params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn edge_video(&self, channel_id: &str, order: &str) -> StorageResult<Option<Video>> {
        self.ensure_channel(channel_id)?;
        let sql = format!(
            "{} WHERE channel_id = ? ORDER BY pubdate {} LIMIT 1",
            VIDEO_SELECT, order
        );
        let video = self
            .conn
            .query_row(&sql, params![channel_id], row_to_video)
            .optional()?;
        Ok(video)
    }

    fn delete_video(&self, id: &str) -> StorageResult<usize> {
        Ok(self.conn.execute("DELETE FROM videos WHERE id = ?", params![id])?)
    }

    fn begin_deferred(&self) -> StorageResult<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }
}

impl SubscriptionStorage for SqliteStorage {
    fn add_channel(&self, id: &str, name: &str, url: &str, thumbnail: &str) -> StorageResult<()> {
        self.conn
            .execute(
                "INSERT INTO channels (id, name, url, notify_on, thumbnail) VALUES (?, ?, ?, 1, ?)",
                params![id, name, url, thumbnail],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StorageError::ObjectAlreadyExists(id.to_string())
                } else {
                    StorageError::Sqlite(e)
                }
            })?;
        Ok(())
    }

    fn get_channel(&self, id: &str) -> StorageResult<Channel> {
        let sql = format!("{} WHERE id = ?", CHANNEL_SELECT);
        self.conn
            .query_row(&sql, params![id], row_to_channel)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StorageError::ObjectDoesNotExist(id.to_string())
                }
                other => StorageError::Sqlite(other),
            })
    }

    fn remove_channel(&self, id: &str) -> StorageResult<()> {
        let changes = self.conn.execute("DELETE FROM channels WHERE id = ?", params![id])?;
        self.commit()?;
        expect_changed(changes, id)
    }

    fn find_channels(&self, name: &str) -> StorageResult<Vec<Channel>> {
        let sql = format!(
            "{} WHERE name LIKE '%' || ? || '%' ESCAPE '\\' ORDER BY name COLLATE NOCASE",
            CHANNEL_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let channels = stmt
            .query_map(params![escape_like(name)], row_to_channel)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(channels)
    }

    fn get_all_channels(&self) -> StorageResult<Vec<Channel>> {
        let sql = format!("{} ORDER BY name COLLATE NOCASE", CHANNEL_SELECT);
        let mut stmt = self.conn.prepare(&sql)?;
        let channels = stmt
            .query_map([], row_to_channel)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(channels)
    }

    fn set_channel_notify_status(&self, id: &str, notify_on: bool) -> StorageResult<()> {
        let changes = self.conn.execute(
            "UPDATE channels SET notify_on = ? WHERE id = ?",
            params![notify_on as i32, id],
        )?;
        expect_changed(changes, id)
    }

    fn add_video(
        &self,
        video: &NewVideo,
        new: bool,
        watched: bool,
        deferred_commit: bool,
    ) -> StorageResult<()> {
        // Reject before evicting so a failed insert never costs a video.
        self.ensure_channel(&video.channel_id)?;
        if self.video_exists(&video.id)? {
            return Err(StorageError::ObjectAlreadyExists(video.id.clone()));
        }

        if deferred_commit {
            self.begin_deferred()?;
        }

        let max = self.max_videos_per_channel.get();
        let mut amt_videos = self.amt_channel_videos(&video.channel_id, VideoKind::All)?;
        while amt_videos >= max as i64 {
            match self.get_oldest_video(&video.channel_id)? {
                Some(oldest) => {
                    debug!(
                        "evicting {} from {} ({} >= {})",
                        oldest.id, video.channel_id, amt_videos, max
                    );
                    self.delete_video(&oldest.id)?;
                    amt_videos -= 1;
                }
                None => break,
            }
        }

        self.conn
            .execute(
                "INSERT INTO videos (id, channel_id, name, url, pubdate, description, thumbnail, new, watched)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    video.id,
                    video.channel_id,
                    video.name,
                    video.url,
                    video.pubdate,
                    video.description,
                    video.thumbnail,
                    new as i32,
                    watched as i32,
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StorageError::ObjectAlreadyExists(video.id.clone())
                } else {
                    StorageError::Sqlite(e)
                }
            })?;

        if !deferred_commit {
            self.commit()?;
        }
        Ok(())
    }

    fn remove_video(&self, id: &str) -> StorageResult<()> {
        let changes = self.delete_video(id)?;
        self.commit()?;
        expect_changed(changes, id)
    }

    fn get_video(&self, id: &str) -> StorageResult<Video> {
        let sql = format!("{} WHERE id = ?", VIDEO_SELECT);
        self.conn
            .query_row(&sql, params![id], row_to_video)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StorageError::ObjectDoesNotExist(id.to_string())
                }
                other => StorageError::Sqlite(other),
            })
    }

    fn find_video_by(
        &self,
        term: &str,
        field: SearchField,
        channel_id: Option<&str>,
    ) -> StorageResult<Vec<Video>> {
        // LIKE is case-insensitive for ASCII.
        let condition = match field {
            SearchField::Name => "name LIKE '%' || ? || '%' ESCAPE '\\'",
            SearchField::Description => "description LIKE '%' || ? || '%' ESCAPE '\\'",
        };
        let pattern = escape_like(term);
        self.query_videos_in(Some(condition), vec![&pattern as &dyn ToSql], &channel_id)
    }

    fn get_all_videos(&self, channel_id: Option<&str>) -> StorageResult<Vec<Video>> {
        self.query_videos_in(None, Vec::new(), &channel_id)
    }

    fn get_all_new_videos(&self, channel_id: Option<&str>) -> StorageResult<Vec<Video>> {
        self.query_videos_in(Some("new = 1"), Vec::new(), &channel_id)
    }

    fn get_all_unwatched_videos(&self, channel_id: Option<&str>) -> StorageResult<Vec<Video>> {
        self.query_videos_in(Some("watched = 0"), Vec::new(), &channel_id)
    }

    fn get_all_videos_by_date_range(
        &self,
        date_min: &str,
        date_max: &str,
        channel_id: Option<&str>,
    ) -> StorageResult<Vec<Video>> {
        self.query_videos_in(
            Some("pubdate > ? AND pubdate < ?"),
            vec![&date_min as &dyn ToSql, &date_max],
            &channel_id,
        )
    }

    fn mark_video_old(&self, id: &str) -> StorageResult<()> {
        let changes = self.conn.execute("UPDATE videos SET new = 0 WHERE id = ?", params![id])?;
        expect_changed(changes, id)
    }

    fn mark_all_videos_old(&self, channel_id: &str) -> StorageResult<()> {
        self.ensure_channel(channel_id)?;
        self.conn.execute(
            "UPDATE videos SET new = 0 WHERE channel_id = ?",
            params![channel_id],
        )?;
        Ok(())
    }

    fn mark_video_watched(&self, id: &str) -> StorageResult<()> {
        let changes = self.conn.execute(
            "UPDATE videos SET watched = 1, new = 0 WHERE id = ?",
            params![id],
        )?;
        expect_changed(changes, id)
    }

    fn mark_all_videos_watched(&self, channel_id: &str) -> StorageResult<()> {
        self.ensure_channel(channel_id)?;
        self.conn.execute(
            "UPDATE videos SET watched = 1, new = 0 WHERE channel_id = ?",
            params![channel_id],
        )?;
        Ok(())
    }

    fn get_newest_video(&self, channel_id: &str) -> StorageResult<Option<Video>> {
        self.edge_video(channel_id, "DESC")
    }

    fn get_oldest_video(&self, channel_id: &str) -> StorageResult<Option<Video>> {
        self.edge_video(channel_id, "ASC")
    }

    fn amt_channel_videos(&self, channel_id: &str, kind: VideoKind) -> StorageResult<i64> {
        let sql = match kind {
            VideoKind::All => "SELECT COUNT(*) FROM videos WHERE channel_id = ?",
            VideoKind::New => "SELECT COUNT(*) FROM videos WHERE channel_id = ? AND new = 1",
            VideoKind::Unwatched => {
                "SELECT COUNT(*) FROM videos WHERE channel_id = ? AND watched = 0"
            }
        };
        let count = self.conn.query_row(sql, params![channel_id], |row| row.get(0))?;
        Ok(count)
    }

    fn set_max_videos_per_channel(&self, max: usize) {
        self.max_videos_per_channel.set(max.max(1));
    }

    fn commit(&self) -> StorageResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}
