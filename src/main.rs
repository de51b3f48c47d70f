use std::fs;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use rusqlite::Connection;
use serde::Serialize;

use ytsm::config::{self, AppPaths, Settings};
use ytsm::errors::Result;
use ytsm::manager::{UpdateSummary, YtSubManager};
use ytsm::scraper::YtScraper;
use ytsm::storage::models::{Channel, Video, VideoKind};
use ytsm::storage::sqlite::SqliteStorage;
use ytsm::watch;

#[derive(Parser)]
#[command(name = "ytsm", version, about = "Track YouTube channel subscriptions from the terminal")]
struct Cli {
    /// Output results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to the channel behind a channel or video URL
    Add {
        url: String,
    },

    /// Unsubscribe from a channel and drop its videos
    Remove {
        channel_id: String,
    },

    /// Fetch new videos for one channel, or for all of them
    Update {
        channel_id: Option<String>,

        /// Update every channel
        #[arg(short, long)]
        all: bool,
    },

    /// List subscribed channels
    Channels {
        /// Only channels with new videos
        #[arg(long, conflicts_with = "unwatched")]
        new: bool,

        /// Only channels with unwatched videos
        #[arg(long)]
        unwatched: bool,
    },

    /// List videos, newest first. Listed videos are marked old.
    Videos {
        channel_id: Option<String>,

        /// Only new videos
        #[arg(long, conflicts_with = "unwatched")]
        new: bool,

        /// Only unwatched videos
        #[arg(long)]
        unwatched: bool,

        /// Maximum number of videos to show
        #[arg(short, long, default_value = "20", conflicts_with = "no_limit")]
        limit: usize,

        /// Show every matching video
        #[arg(long)]
        no_limit: bool,
    },

    /// Search channels by name, or videos by name or description
    Find {
        term: String,

        /// Search video names instead of channel names
        #[arg(long)]
        videos: bool,

        /// Search video descriptions
        #[arg(long, conflicts_with = "videos")]
        description: bool,

        /// Restrict a video search to one channel
        #[arg(long)]
        channel: Option<String>,
    },

    /// Videos published between two dates (YYYY-MM-DD), exclusive
    Range {
        min: String,
        max: String,

        #[arg(long)]
        channel: Option<String>,
    },

    /// Show everything known about a video
    Detail {
        video_id: String,
    },

    /// Mark a video, or with --channel all of a channel's videos, watched
    Watched {
        id: String,

        #[arg(long)]
        channel: bool,
    },

    /// Mark a video, or with --channel all of a channel's videos, old
    Old {
        id: String,

        #[arg(long)]
        channel: bool,
    },

    /// Turn new-video notifications for a channel on or off
    Notify {
        channel_id: String,
        state: NotifyState,
    },

    /// Update all channels on a schedule until interrupted
    Watch {
        /// Minutes between updates (defaults to the settings file)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Report whether a watcher is running
        #[arg(long, conflicts_with = "stop")]
        status: bool,

        /// Stop a running watcher
        #[arg(long)]
        stop: bool,
    },

    /// Reset settings and/or delete the database
    FactoryRestore {
        #[arg(long)]
        settings: bool,

        #[arg(long)]
        db: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum NotifyState {
    On,
    Off,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ChannelRow {
    #[serde(flatten)]
    channel: Channel,
    videos: i64,
    new: i64,
    unwatched: i64,
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    let level = match (&cli.command, cli.verbose) {
        (_, true) | (Some(Commands::Watch { .. }), _) => LevelFilter::Info,
        _ => LevelFilter::Warn,
    };
    config::init_logger(level);

    if let Err(e) = run(cli) {
        if json {
            eprintln!("{}", serde_json::json!({"error": e.to_string()}));
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::new()?;
    let json = cli.json;

    match cli.command {
        None => cmd_videos(&paths, None, VideoKind::New, Some(20), json),
        Some(Commands::Add { url }) => cmd_add(&paths, &url, json),
        Some(Commands::Remove { channel_id }) => {
            let manager = open_manager(&paths)?;
            manager.remove_channel(&channel_id)?;
            print_status(json, format!("Removed channel {}.", channel_id))
        }
        Some(Commands::Update { channel_id, all }) => match channel_id {
            Some(id) if !all => cmd_update_one(&paths, &id, json),
            _ => cmd_update_all(&paths, json),
        },
        Some(Commands::Channels { new, unwatched }) => cmd_channels(&paths, new, unwatched, json),
        Some(Commands::Videos {
            channel_id,
            new,
            unwatched,
            limit,
            no_limit,
        }) => {
            let kind = video_kind(new, unwatched);
            let limit = if no_limit { None } else { Some(limit) };
            cmd_videos(&paths, channel_id.as_deref(), kind, limit, json)
        }
        Some(Commands::Find {
            term,
            videos,
            description,
            channel,
        }) => cmd_find(&paths, &term, videos, description, channel.as_deref(), json),
        Some(Commands::Range { min, max, channel }) => {
            let manager = open_manager(&paths)?;
            let videos = manager.get_videos_by_date_range(&min, &max, channel.as_deref())?;
            print_videos(&videos, json)
        }
        Some(Commands::Detail { video_id }) => cmd_detail(&paths, &video_id, json),
        Some(Commands::Watched { id, channel }) => {
            let manager = open_manager(&paths)?;
            if channel {
                manager.mark_all_videos_watched(&id)?;
                print_status(json, format!("Marked all videos of {} watched.", id))
            } else {
                manager.mark_video_watched(&id)?;
                print_status(json, format!("Marked {} watched.", id))
            }
        }
        Some(Commands::Old { id, channel }) => {
            let manager = open_manager(&paths)?;
            if channel {
                manager.mark_all_videos_old(&id)?;
                print_status(json, format!("Marked all videos of {} old.", id))
            } else {
                manager.mark_video_old(&id)?;
                print_status(json, format!("Marked {} old.", id))
            }
        }
        Some(Commands::Notify { channel_id, state }) => {
            let manager = open_manager(&paths)?;
            let on = matches!(state, NotifyState::On);
            manager.set_notify(&channel_id, on)?;
            let word = if on { "on" } else { "off" };
            print_status(json, format!("Notifications for {} turned {}.", channel_id, word))
        }
        Some(Commands::Watch {
            interval,
            status,
            stop,
        }) => cmd_watch(&paths, interval, status, stop, json),
        Some(Commands::FactoryRestore { settings, db }) => {
            cmd_factory_restore(&paths, settings, db, json)
        }
    }
}

fn video_kind(new: bool, unwatched: bool) -> VideoKind {
    if new {
        VideoKind::New
    } else if unwatched {
        VideoKind::Unwatched
    } else {
        VideoKind::All
    }
}

fn open_manager(paths: &AppPaths) -> Result<YtSubManager<SqliteStorage>> {
    fs::create_dir_all(&paths.base_dir)?;
    let settings = Settings::load(&paths.settings_path)?;
    let conn = Connection::open(&paths.db_path)?;
    let storage = SqliteStorage::new(conn, settings.max_videos_per_channel)?;
    let scraper = YtScraper::new(settings.request.clone());
    Ok(YtSubManager::new(storage, scraper))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn print_status(json: bool, message: String) -> Result<()> {
    if json {
        print_json(&StatusResponse {
            success: true,
            message,
        })
    } else {
        println!("{}", message);
        Ok(())
    }
}

fn cmd_add(paths: &AppPaths, url: &str, json: bool) -> Result<()> {
    let mut manager = open_manager(paths)?;
    let channel_id = manager.add_channel(url)?;
    let channel = manager.get_channel(&channel_id)?;
    let counts = manager.get_amt_videos(&channel_id)?;
    print_status(
        json,
        format!(
            "Added channel {} ({}) with {} videos.",
            channel.name, channel.id, counts.all
        ),
    )
}

fn cmd_update_one(paths: &AppPaths, channel_id: &str, json: bool) -> Result<()> {
    let mut manager = open_manager(paths)?;
    let added = manager.update_channel(channel_id, false)?;
    if json {
        return print_json(&serde_json::json!({ "channel_id": channel_id, "new": added }));
    }
    println!("{}: {} new videos.", channel_id, added);
    Ok(())
}

fn cmd_update_all(paths: &AppPaths, json: bool) -> Result<()> {
    let mut manager = open_manager(paths)?;
    let summary = manager.update_all_channels()?;
    let notify = watch::notify_summary(manager.storage(), &summary)?;

    if json {
        return print_json(&serde_json::json!({
            "summary": summary,
            "notify": notify,
        }));
    }

    print_summary(&summary);
    if !notify.is_empty() {
        println!("New videos from: {}", notify.join(", "));
    }
    Ok(())
}

fn print_summary(summary: &UpdateSummary) {
    println!("{} new videos.", summary.total);
    for (channel_id, added) in &summary.new_per_channel {
        if *added > 0 {
            println!("  {:<26} +{}", channel_id, added);
        }
    }
    for (channel_id, error) in &summary.errors {
        println!("  {:<26} failed: {}", channel_id, error);
    }
}

fn cmd_channels(paths: &AppPaths, new: bool, unwatched: bool, json: bool) -> Result<()> {
    let manager = open_manager(paths)?;
    let mut rows = Vec::new();
    for channel in manager.get_all_channels()? {
        let counts = manager.get_amt_videos(&channel.id)?;
        if (new && counts.new == 0) || (unwatched && counts.unwatched == 0) {
            continue;
        }
        rows.push(ChannelRow {
            channel,
            videos: counts.all,
            new: counts.new,
            unwatched: counts.unwatched,
        });
    }

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No channels found.");
        return Ok(());
    }
    for row in &rows {
        let bell = if row.channel.notify_on { " " } else { "-" };
        println!(
            "{}{:<26} {:>4} new {:>4} unwatched {:>4} total  {}",
            bell, row.channel.id, row.new, row.unwatched, row.videos, row.channel.name
        );
    }
    Ok(())
}

fn cmd_videos(
    paths: &AppPaths,
    channel_id: Option<&str>,
    kind: VideoKind,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let manager = open_manager(paths)?;
    let mut videos = manager.get_videos(kind, channel_id)?;
    if let Some(limit) = limit {
        videos.truncate(limit);
    }

    print_videos(&videos, json)?;
    for video in videos.iter().filter(|v| v.new) {
        manager.mark_video_old(&video.id)?;
    }
    Ok(())
}

fn print_videos(videos: &[Video], json: bool) -> Result<()> {
    if json {
        return print_json(&videos);
    }
    if videos.is_empty() {
        println!("No videos found.");
        return Ok(());
    }
    for video in videos {
        let mark = match (video.new, video.watched) {
            (true, _) => "N",
            (false, false) => "U",
            (false, true) => " ",
        };
        println!(
            "{} {} {:<11} {}",
            mark,
            video.sensible_pubdate(),
            video.id,
            truncate(&video.name, 70)
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max - 3).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

fn cmd_find(
    paths: &AppPaths,
    term: &str,
    videos: bool,
    description: bool,
    channel: Option<&str>,
    json: bool,
) -> Result<()> {
    let manager = open_manager(paths)?;
    if description {
        return print_videos(&manager.find_video_by_description(term, channel)?, json);
    }
    if videos {
        return print_videos(&manager.find_video_by_name(term, channel)?, json);
    }

    let channels = manager.find_channels(term)?;
    if json {
        return print_json(&channels);
    }
    if channels.is_empty() {
        println!("No channels matching \"{}\".", term);
        return Ok(());
    }
    for channel in &channels {
        println!("{:<26} {}", channel.id, channel.name);
    }
    Ok(())
}

fn cmd_detail(paths: &AppPaths, video_id: &str, json: bool) -> Result<()> {
    let manager = open_manager(paths)?;
    let video = manager.get_video(video_id)?;
    if json {
        return print_json(&video);
    }

    let channel = manager.get_channel(&video.channel_id)?;
    println!("ID:        {}", video.id);
    println!("Title:     {}", video.name);
    println!("Channel:   {} ({})", channel.name, channel.id);
    println!("Published: {}", video.sensible_pubdate());
    println!("URL:       {}", video.url);
    println!("Thumbnail: {}", video.thumbnail);
    println!("New:       {}", video.new);
    println!("Watched:   {}", video.watched);
    if !video.description.is_empty() {
        println!("─────────────────────────");
        println!("{}", video.description);
    }
    Ok(())
}

fn cmd_watch(paths: &AppPaths, interval: Option<u64>, status: bool, stop: bool, json: bool) -> Result<()> {
    if status {
        let pid = watch::watcher_status(paths)?;
        if json {
            return print_json(&serde_json::json!({ "running": pid.is_some(), "pid": pid }));
        }
        match pid {
            Some(pid) => println!("Watcher running (pid {}).", pid),
            None => println!("Watcher is not running."),
        }
        return Ok(());
    }

    if stop {
        let stopped = watch::stop_watcher(paths)?;
        let message = if stopped {
            "Stopped watcher."
        } else {
            "Watcher is not running."
        };
        if json {
            return print_json(&StatusResponse {
                success: stopped,
                message: message.to_string(),
            });
        }
        println!("{}", message);
        return Ok(());
    }

    let settings = Settings::load(&paths.settings_path)?;
    let minutes = interval.unwrap_or(settings.update_interval_minutes).max(1);
    let mut manager = open_manager(paths)?;
    watch::run_watcher(paths, &mut manager, Duration::from_secs(minutes * 60))
}

fn cmd_factory_restore(paths: &AppPaths, settings: bool, db: bool, json: bool) -> Result<()> {
    let (settings, db) = if !settings && !db { (true, true) } else { (settings, db) };
    let mut done = Vec::new();

    if settings {
        Settings::restore(&paths.settings_path)?;
        done.push("settings restored");
    }
    if db {
        match fs::remove_file(&paths.db_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        done.push("database deleted");
    }

    print_status(json, format!("Factory restore: {}.", done.join(", ")))
}
