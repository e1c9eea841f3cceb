use std::fmt;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use chrono::Local;
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

use crate::error::SyncError;

pub const REFRESH_LOG_FILE: &str = "update_pipeline_data.log";
pub const SCAN_LOG_FILE: &str = "update_datasets.log";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

#[derive(Clone)]
pub struct TaskLog {
    dispatch: Dispatch,
}

impl TaskLog {
    pub fn file(dir: &Utf8Path, file_name: &str) -> Result<Self, SyncError> {
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("create {dir}: {err}")))?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name)
            .build(dir.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("open log {dir}/{file_name}: {err}")))?;
        Ok(Self::with_writer(appender))
    }

    pub fn with_writer<W>(writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_ansi(false)
            .with_max_level(Level::INFO)
            .event_format(LineFormat)
            .finish();
        Self {
            dispatch: Dispatch::new(subscriber),
        }
    }

    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl fmt::Debug for TaskLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLog").finish_non_exhaustive()
    }
}

pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} [{}] ",
            Local::now().format(TIMESTAMP_FORMAT),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

pub struct LogBufferWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("log buffer poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_timestamp_and_level() {
        let buffer = LogBuffer::new();
        let log = TaskLog::with_writer(buffer.clone());
        log.in_scope(|| tracing::info!("hello {}", "world"));

        let contents = buffer.contents();
        let line = contents.lines().next().unwrap();
        let (stamp, rest) = line.split_at(23);
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[19..20], ",");
        assert_eq!(rest, " [INFO] hello world");
    }

    #[test]
    fn sinks_do_not_leak_into_each_other() {
        let first = LogBuffer::new();
        let second = LogBuffer::new();
        let first_log = TaskLog::with_writer(first.clone());
        let _second_log = TaskLog::with_writer(second.clone());

        first_log.in_scope(|| tracing::error!("only once"));

        assert_eq!(first.contents().matches("only once").count(), 1);
        assert!(second.contents().is_empty());
    }

    #[test]
    fn debug_events_are_filtered() {
        let buffer = LogBuffer::new();
        let log = TaskLog::with_writer(buffer.clone());
        log.in_scope(|| tracing::debug!("noise"));
        assert!(buffer.contents().is_empty());
    }
}
