//! Bounded-queue asynchronous log sink with date/line-count rotation.
//!
//! A single process-wide `Log` instance buffers formatted records into a
//! bounded blocking queue drained by a dedicated writer thread, so callers
//! never block on file I/O beyond a queue push. When the queue is full the
//! producer falls back to writing the record itself rather than dropping
//! it or blocking the caller.

mod queue;

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use chrono::{DateTime, Datelike, Local};

pub use queue::BlockingQueue;

const MAX_LINES: usize = 50_000;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "[debug]: ",
            Level::Info => "[info] : ",
            Level::Warn => "[warn] : ",
            Level::Error => "[error]: ",
        }
    }
}

struct LogFile {
    dir: PathBuf,
    suffix: String,
    file: Option<std::fs::File>,
    to_day: i32,
    line_count: usize,
}

impl LogFile {
    fn maybe_rotate(&mut self, now: DateTime<Local>) {
        let today = now.date_naive();
        let today_ordinal = today.num_days_from_ce();
        let date_changed = self.to_day != today_ordinal;
        let line_boundary = self.line_count > 0 && self.line_count % MAX_LINES == 0;
        if !date_changed && !line_boundary {
            return;
        }
        self.flush();
        let filename = if date_changed {
            self.to_day = today_ordinal;
            self.line_count = 0;
            self.dir.join(format!("{}{}", today.format("%Y_%m_%d"), self.suffix))
        } else {
            self.dir.join(format!(
                "{}-{}{}",
                today.format("%Y_%m_%d"),
                self.line_count / MAX_LINES,
                self.suffix
            ))
        };
        match OpenOptions::new().create(true).append(true).open(&filename) {
            Ok(f) => self.file = Some(f),
            Err(e) => eprintln!("proxy_log: failed to open {}: {e}", filename.display()),
        }
    }

    fn write_line(&mut self, line: &str) {
        if let Some(f) = self.file.as_mut() {
            let _ = f.write_all(line.as_bytes());
        }
    }

    fn flush(&mut self) {
        if let Some(f) = self.file.as_mut() {
            let _ = f.flush();
        }
    }
}

pub struct Log {
    level: AtomicU8,
    inner: Mutex<LogFile>,
    queue: OnceLock<Arc<BlockingQueue<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

static LOG: OnceLock<Log> = OnceLock::new();

impl Log {
    fn instance() -> &'static Log {
        LOG.get_or_init(|| Log {
            level: AtomicU8::new(Level::Info as u8),
            inner: Mutex::new(LogFile {
                dir: PathBuf::new(),
                suffix: String::new(),
                file: None,
                to_day: -1,
                line_count: 0,
            }),
            queue: OnceLock::new(),
            writer: Mutex::new(None),
        })
    }

    fn write(&'static self, level: Level, args: std::fmt::Arguments<'_>) {
        if (level as u8) < self.level.load(Ordering::Relaxed) {
            return;
        }
        let now = Local::now();
        let line = {
            let mut inner = self.inner.lock().unwrap();
            inner.maybe_rotate(now);
            inner.line_count += 1;
            format!(
                "{} {}{}\n",
                now.format("%Y-%m-%d %H:%M:%S%.6f"),
                level.tag(),
                args
            )
        };
        match self.queue.get() {
            Some(q) => {
                if let Err(line) = q.try_push(line) {
                    self.write_sync(&line);
                }
            }
            None => self.write_sync(&line),
        }
    }

    fn write_sync(&self, line: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.write_line(line);
    }
}

/// Initialises the sink. `queue_cap == 0` makes every write synchronous;
/// otherwise a dedicated writer thread drains a bounded queue of that
/// capacity. Directory is created (mode 0777) if it doesn't exist.
pub fn init(level: u8, dir: &str, suffix: &str, queue_cap: usize) {
    let _ = fs::create_dir_all(dir);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o777));
    }

    let log = Log::instance();
    log.level.store(level, Ordering::Relaxed);

    let now = Local::now();
    let today = now.date_naive();
    let dir_path = PathBuf::from(dir);
    let filename = dir_path.join(format!("{}{}", today.format("%Y_%m_%d"), suffix));
    let file = OpenOptions::new().create(true).append(true).open(&filename).ok();

    {
        let mut inner = log.inner.lock().unwrap();
        inner.dir = dir_path;
        inner.suffix = suffix.to_string();
        inner.file = file;
        inner.to_day = today.num_days_from_ce();
        inner.line_count = 0;
    }

    if queue_cap > 0 {
        let q = Arc::new(BlockingQueue::new(queue_cap));
        let worker_queue = q.clone();
        let handle = std::thread::Builder::new()
            .name("proxy_log-writer".into())
            .spawn(move || {
                while let Some(line) = worker_queue.pop() {
                    Log::instance().write_sync(&line);
                }
            })
            .expect("spawn log writer thread");
        let _ = log.queue.set(q);
        *log.writer.lock().unwrap() = Some(handle);
    }
}

/// Drains the queue, closes it, joins the writer thread, then flushes and
/// closes the current file. Safe to call even if `init` ran synchronously.
pub fn shutdown() {
    let log = Log::instance();
    if let Some(q) = log.queue.get() {
        while !q.is_empty() {
            std::thread::yield_now();
        }
        q.close();
    }
    if let Some(handle) = log.writer.lock().unwrap().take() {
        let _ = handle.join();
    }
    let mut inner = log.inner.lock().unwrap();
    inner.flush();
    inner.file = None;
}

#[doc(hidden)]
pub fn log(level: Level, args: std::fmt::Arguments<'_>) {
    Log::instance().write(level, args);
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => { $crate::log($crate::Level::Debug, format_args!($($arg)*)) };
}
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::log($crate::Level::Info, format_args!($($arg)*)) };
}
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::log($crate::Level::Warn, format_args!($($arg)*)) };
}
#[macro_export]
macro_rules! errors {
    ($($arg:tt)*) => { $crate::log($crate::Level::Error, format_args!($($arg)*)) };
}
// Kept alongside `debug!` for call sites ported from the original macro
// facade that reach for `trace!` on very chatty per-byte logging.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => { $crate::log($crate::Level::Debug, format_args!($($arg)*)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_tags_are_nine_bytes() {
        for tag in [Level::Debug.tag(), Level::Info.tag(), Level::Warn.tag(), Level::Error.tag()] {
            assert_eq!(tag.len(), 9);
        }
    }

    #[test]
    fn synchronous_init_writes_immediately() {
        let dir = std::env::temp_dir().join(format!("proxy_log_test_{}", std::process::id()));
        init(0, dir.to_str().unwrap(), ".log", 0);
        errors!("synchronous write {}", 42);
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(!entries.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }
}
