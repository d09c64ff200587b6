use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use env_logger::fmt::{Color, Formatter};
use log::{info, Level, LevelFilter, Metadata, Record};

pub const APP_NAME: &str = "imagecloud";
const MAX_LOG_LINES: usize = 1000;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Last `MAX_LOG_LINES` crate log lines, shared between the logger, the panic hook and
/// the log export.
pub type LogBuffer = Arc<Mutex<VecDeque<String>>>;

struct BufferLogger {
    log_buffer: LogBuffer,
}

impl BufferLogger {
    fn new() -> Self {
        Self {
            log_buffer: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES))),
        }
    }

    fn log_to_buffer(&self, message: &str, target: &str, line: Option<u32>) {
        let Ok(mut buffer) = self.log_buffer.lock() else {
            return;
        };
        if buffer.len() == MAX_LOG_LINES {
            buffer.pop_front();
        }
        let formatted_message = match line {
            Some(line_num) => format!("{target}:{line_num} {message}"),
            None => format!("{target} {message}"),
        };
        buffer.push_back(formatted_message);
    }

    fn get_shared_buffer(&self) -> LogBuffer {
        Arc::clone(&self.log_buffer)
    }
}

impl log::Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with(APP_NAME) && metadata.level() <= LevelFilter::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!("{:<5} {}", record.level(), record.args());
            self.log_to_buffer(&message, record.target(), record.line());
        }
    }

    fn flush(&self) {}
}

struct CompositeLogger {
    console_logger: env_logger::Logger,
    buffer_logger: BufferLogger,
}

impl log::Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console_logger.enabled(metadata) || self.buffer_logger.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.console_logger.enabled(record.metadata()) {
            self.console_logger.log(record);
        }
        if self.buffer_logger.enabled(record.metadata()) {
            self.buffer_logger.log(record);
        }
    }

    fn flush(&self) {
        self.console_logger.flush();
        self.buffer_logger.flush();
    }
}

/// Installs the console + ring buffer logger and returns the buffer.
///
/// `RUST_LOG` wins when set. Otherwise this crate logs at debug in debug builds and at
/// error in release builds; other crates are silent.
pub fn setup_logger() -> LogBuffer {
    let buffer_logger = BufferLogger::new();
    let shared_buffer = buffer_logger.get_shared_buffer();

    let mut builder = env_logger::Builder::new();
    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        if cfg!(debug_assertions) {
            builder.filter(Some(APP_NAME), LevelFilter::Debug);
        } else {
            builder.filter(Some(APP_NAME), LevelFilter::Error);
        }
        builder.filter(None, LevelFilter::Off);
    }

    builder.format(|buf: &mut Formatter, record: &Record| {
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);
        let module_info = match (record.module_path(), record.line()) {
            (Some(module), Some(line)) => format!("{module}:{line}"),
            (Some(module), None) => module.to_string(),
            (None, Some(line)) => format!("line:{line}"),
            (None, None) => "unknown".to_string(),
        };

        let mut level_style = buf.style();
        let mut meta_style = buf.style();
        match record.level() {
            Level::Error => level_style.set_color(Color::Red).set_bold(true),
            Level::Warn => level_style.set_color(Color::Yellow).set_bold(true),
            Level::Info => level_style.set_color(Color::Green).set_bold(true),
            Level::Debug => level_style.set_color(Color::Blue).set_bold(true),
            Level::Trace => level_style.set_color(Color::White),
        };

        #[cfg(target_os = "macos")]
        {
            // Color::Rgb does not render on the macOS terminal
            meta_style.set_color(Color::Blue);
        }
        #[cfg(not(target_os = "macos"))]
        {
            meta_style.set_color(Color::Rgb(120, 120, 120));
        }

        writeln!(
            buf,
            "{} {} {} {}",
            meta_style.value(timestamp),
            level_style.value(record.level()),
            meta_style.value(module_info),
            record.args()
        )
    });

    let composite_logger = CompositeLogger {
        console_logger: builder.build(),
        buffer_logger,
    };

    match log::set_boxed_logger(Box::new(composite_logger)) {
        // Trace so that the per-logger filters decide
        Ok(()) => log::set_max_level(LevelFilter::Trace),
        Err(e) => eprintln!("Logger already installed: {e}"),
    }

    shared_buffer
}

pub fn get_log_directory() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("logs")
}

/// Writes the captured log lines to `debug.log` in `log_dir`.
pub fn export_debug_logs(log_dir: &std::path::Path, log_buffer: &LogBuffer) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let debug_log_path = log_dir.join("debug.log");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&debug_log_path)?;

    let timestamp = Utc::now().format(TIMESTAMP_FORMAT);
    // copy out so the lock is not held during file IO
    let log_entries: Vec<String> = match log_buffer.lock() {
        Ok(buffer) => buffer.iter().cloned().collect(),
        Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
    };

    writeln!(file, "{timestamp} [DEBUG EXPORT] {APP_NAME} debug log export")?;
    writeln!(
        file,
        "{timestamp} [DEBUG EXPORT] {} entries (last {MAX_LOG_LINES} max)",
        log_entries.len()
    )?;
    writeln!(file)?;
    for log_entry in &log_entries {
        writeln!(file, "{timestamp} {log_entry}")?;
    }
    file.flush()?;

    info!("Debug logs exported to: {}", debug_log_path.display());
    Ok(debug_log_path)
}

/// Writes the panic location, a backtrace and the buffered log lines to `panic.log`.
pub fn setup_panic_hook(log_buffer: LogBuffer) {
    let log_dir = get_log_directory();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {e}", log_dir.display());
    }
    let log_file_path = log_dir.join("panic.log");

    panic::set_hook(Box::new(move |info| {
        let backtrace = backtrace::Backtrace::new();
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT);
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        let header_msg = format!("[PANIC] at {location} - {info}");
        let backtrace_lines: Vec<String> = format!("{backtrace:?}")
            .lines()
            .map(|line| format!("[BACKTRACE] {}", line.trim()))
            .collect();

        let written = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_file_path)
            .and_then(|mut file| {
                writeln!(file, "{timestamp} {header_msg}")?;
                writeln!(file, "{timestamp} [PANIC] Backtrace:")?;
                for line in &backtrace_lines {
                    writeln!(file, "{timestamp} {line}")?;
                }
                writeln!(file)?;
                writeln!(file, "{timestamp} [PANIC] Last {MAX_LOG_LINES} log entries:")?;
                if let Ok(buffer) = log_buffer.lock() {
                    for log in buffer.iter() {
                        writeln!(file, "{timestamp} {log}")?;
                    }
                }
                Ok(())
            });

        eprintln!("\n\n{header_msg}");
        eprintln!("[PANIC] Backtrace:");
        for line in &backtrace_lines {
            eprintln!("{line}");
        }
        match written {
            Ok(()) => eprintln!("\nA complete crash log has been written to: {}", log_file_path.display()),
            Err(e) => eprintln!("\nFailed to write crash log: {e}"),
        }
    }));
}
