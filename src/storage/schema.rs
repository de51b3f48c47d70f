pub const CREATE_CHANNELS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS channels (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        notify_on INTEGER NOT NULL DEFAULT 1,
        thumbnail TEXT NOT NULL
    )
";

pub const CREATE_VIDEOS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS videos (
        id TEXT PRIMARY KEY NOT NULL,
        channel_id TEXT NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        pubdate TEXT NOT NULL,
        description TEXT NOT NULL,
        thumbnail TEXT NOT NULL,
        new INTEGER NOT NULL,
        watched INTEGER NOT NULL,
        FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
    )
";

pub const CREATE_INDEX_CHANNEL_PUBDATE: &str =
    "CREATE INDEX IF NOT EXISTS idx_videos_channel_pubdate ON videos(channel_id, pubdate)";

pub const CREATE_INDEX_PUBDATE: &str =
    "CREATE INDEX IF NOT EXISTS idx_videos_pubdate ON videos(pubdate)";
