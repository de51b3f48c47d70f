use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::config::AppPaths;
use crate::errors::{Result, YtsmError};
use crate::manager::{UpdateSummary, YtSubManager};
use crate::storage::SubscriptionStorage;

const TICK: Duration = Duration::from_millis(500);

pub fn write_pid_file(path: &Path) -> Result<()> {
    fs::write(path, std::process::id().to_string())?;
    Ok(())
}

/// Parses a pid file. Only a positive `pid_t` counts: 0 and negative values
/// would make `kill` target a process group or every process.
fn parse_pid(contents: &str) -> Option<libc::pid_t> {
    contents
        .trim()
        .parse::<libc::pid_t>()
        .ok()
        .filter(|pid| *pid > 0)
}

/// The watcher pid recorded at `path`. A missing or unusable file yields
/// `None`.
pub fn read_pid_file(path: &Path) -> Result<Option<libc::pid_t>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_pid(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(YtsmError::Io(e)),
    }
}

pub fn remove_pid_file(path: &Path) -> Result<()> {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(YtsmError::Io(e));
        }
    }
    Ok(())
}

fn is_process_running(pid: libc::pid_t) -> bool {
    pid > 0 && unsafe { libc::kill(pid, 0) } == 0
}

/// Pid of the live watcher. A pid file that is unreadable or names a dead
/// process is removed.
pub fn watcher_status(paths: &AppPaths) -> Result<Option<libc::pid_t>> {
    let live = read_pid_file(&paths.pid_file)?.filter(|pid| is_process_running(*pid));
    if live.is_none() && paths.pid_file.exists() {
        remove_pid_file(&paths.pid_file)?;
    }
    Ok(live)
}

/// Sends SIGTERM to the live watcher. Returns whether there was one.
pub fn stop_watcher(paths: &AppPaths) -> Result<bool> {
    let Some(pid) = watcher_status(paths)? else {
        return Ok(false);
    };
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        warn!("could not signal watcher {}", pid);
    }
    remove_pid_file(&paths.pid_file)?;
    Ok(true)
}

/// Names of channels that want notifications and received new videos.
pub fn notify_summary<S: SubscriptionStorage>(storage: &S, summary: &UpdateSummary) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for (channel_id, added) in &summary.new_per_channel {
        if *added == 0 {
            continue;
        }
        let channel = storage.get_channel(channel_id)?;
        if channel.notify_on {
            names.push(channel.name);
        }
    }
    Ok(names)
}

/// One update of every channel. Returns the channels to notify about.
pub fn poll_once<S: SubscriptionStorage>(manager: &mut YtSubManager<S>) -> Result<Vec<String>> {
    let summary = manager.update_all_channels()?;
    for (channel_id, error) in &summary.errors {
        warn!("{}: {}", channel_id, error);
    }
    notify_summary(manager.storage(), &summary)
}

/// Sleeps for `interval` in short ticks, returning early once `running` is
/// cleared.
fn sleep_while_running(running: &AtomicBool, interval: Duration) {
    let deadline = Instant::now() + interval;
    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(TICK.min(deadline - now));
    }
}

/// Updates every channel each `interval` until Ctrl-C.
pub fn run_watcher<S: SubscriptionStorage>(
    paths: &AppPaths,
    manager: &mut YtSubManager<S>,
    interval: Duration,
) -> Result<()> {
    fs::create_dir_all(&paths.base_dir)?;
    if let Some(pid) = watcher_status(paths)? {
        return Err(YtsmError::Settings(format!("a watcher is already running (pid {})", pid)));
    }
    write_pid_file(&paths.pid_file)?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    info!(
        "watching channels every {} minutes (pid {})",
        interval.as_secs() / 60,
        std::process::id()
    );

    while running.load(Ordering::Relaxed) {
        match poll_once(manager) {
            Ok(names) if !names.is_empty() => info!("new videos from: {}", names.join(", ")),
            Ok(_) => {}
            Err(e) => error!("update failed: {}", e),
        }
        sleep_while_running(&running, interval);
    }

    info!("shutting down");
    remove_pid_file(&paths.pid_file)?;
    Ok(())
}

fn ctrlc_handler(running: Arc<AtomicBool>) {
    let _ = ctrlc::set_handler(move || {
        running.store(false, Ordering::Relaxed);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestSettings;
    use crate::scraper::{feed_url, YtScraper};
    use crate::storage::sqlite::SqliteStorage;
    use crate::test_support::{feed_xml, FakeFetcher, FeedEntry};
    use tempfile::TempDir;

    // --- Pid file ---

    fn own_pid() -> libc::pid_t {
        std::process::id() as libc::pid_t
    }

    #[test]
    fn test_write_and_read_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("test.pid");
        write_pid_file(&pid_path).unwrap();
        assert_eq!(read_pid_file(&pid_path).unwrap(), Some(own_pid()));
    }

    #[test]
    fn test_parse_pid_rejects_non_positive_and_overflow() {
        assert_eq!(parse_pid(" 42\n"), Some(42));
        assert_eq!(parse_pid("0"), None);
        assert_eq!(parse_pid("-1"), None);
        assert_eq!(parse_pid("4294967295"), None);
        assert_eq!(parse_pid("2147483648"), None);
    }

    #[test]
    fn test_unsafe_pids_are_never_live() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        for contents in ["0", "4294967295", "-1"] {
            fs::write(&paths.pid_file, contents).unwrap();
            assert_eq!(watcher_status(&paths).unwrap(), None, "pid file {:?}", contents);
            assert!(!paths.pid_file.exists());

            fs::write(&paths.pid_file, contents).unwrap();
            assert!(!stop_watcher(&paths).unwrap());
        }
    }

    #[test]
    fn test_read_garbage_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("test.pid");
        fs::write(&pid_path, "not a pid").unwrap();
        assert_eq!(read_pid_file(&pid_path).unwrap(), None);
    }

    #[test]
    fn test_remove_missing_pid_file_ok() {
        let dir = TempDir::new().unwrap();
        assert!(remove_pid_file(&dir.path().join("nonexistent.pid")).is_ok());
    }

    #[test]
    fn test_status_of_own_pid() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        write_pid_file(&paths.pid_file).unwrap();
        assert_eq!(watcher_status(&paths).unwrap(), Some(own_pid()));
    }

    #[test]
    fn test_status_stale_pid() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        fs::write(&paths.pid_file, "99999999").unwrap();
        assert!(watcher_status(&paths).unwrap().is_none());
        assert!(!paths.pid_file.exists());
    }

    #[test]
    fn test_stop_without_watcher() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::from_base(dir.path().to_path_buf());
        assert!(!stop_watcher(&paths).unwrap());
    }

    // --- Sleeping ---

    #[test]
    fn test_sleep_returns_when_stopped() {
        let running = AtomicBool::new(false);
        let start = Instant::now();
        sleep_while_running(&running, Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_honours_short_interval() {
        let running = AtomicBool::new(true);
        let start = Instant::now();
        sleep_while_running(&running, Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    // --- Notifications ---

    fn manager(fetcher: FakeFetcher) -> YtSubManager<SqliteStorage> {
        let settings = RequestSettings {
            threads: 2,
            max_passes: 0,
            sleep_pass_secs: 0,
            connection_max_tries: 0,
            timeout_secs: 5,
        };
        let scraper = YtScraper::with_fetcher(Arc::new(fetcher), settings);
        YtSubManager::new(SqliteStorage::in_memory(150).unwrap(), scraper)
    }

    #[test]
    fn test_poll_notifies_only_opted_in_channels() {
        let a = feed_xml("A", "Alpha", &[FeedEntry::new("a1", "2021-01-01T00:00:00+00:00")]);
        let b = feed_xml("B", "Beta", &[FeedEntry::new("b1", "2021-01-01T00:00:00+00:00")]);
        let c = feed_xml("C", "Gamma", &[]);
        let mut m = manager(
            FakeFetcher::new()
                .page(&feed_url("A"), 200, &a)
                .page(&feed_url("B"), 200, &b)
                .page(&feed_url("C"), 200, &c),
        );
        m.storage().add_channel("A", "Alpha", "https://www.youtube.com/channel/A", "t").unwrap();
        m.storage().add_channel("B", "Beta", "https://www.youtube.com/channel/B", "t").unwrap();
        m.storage().add_channel("C", "Gamma", "https://www.youtube.com/channel/C", "t").unwrap();
        m.set_notify("B", false).unwrap();

        assert_eq!(poll_once(&mut m).unwrap(), vec!["Alpha".to_string()]);
        // Nothing new the second time round.
        assert!(poll_once(&mut m).unwrap().is_empty());
    }

    #[test]
    fn test_notify_summary_skips_failed_channels() {
        let m = manager(FakeFetcher::new());
        m.storage().add_channel("A", "Alpha", "https://www.youtube.com/channel/A", "t").unwrap();
        let mut summary = UpdateSummary::default();
        summary
            .errors
            .insert("A".to_string(), crate::errors::ScraperError::CacheMiss("A".to_string()));
        assert!(notify_summary(m.storage(), &summary).unwrap().is_empty());
    }
}
