use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::{Error, Event};

/// Durable storage of event records, one table per store.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Reads every record of the table, in insertion order.
    async fn scan(&self) -> Result<Vec<Event>, Error>;

    /// Appends one record to the table. Records are never rewritten.
    async fn append(&self, event: &Event) -> Result<(), Error>;
}

/// A table kept in memory as serialized lines.
///
/// Clones share the same table, so two stores opened on clones of one backend behave like two
/// processes sharing a file.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryBackend {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table from newline separated records. Blank lines are skipped.
    pub fn from_lines(lines: &str) -> Result<Self, Error> {
        let lines = lines
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Event::from_line(line).map(|_| line.to_string()))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            lines: Arc::new(Mutex::new(lines)),
        })
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn scan(&self) -> Result<Vec<Event>, Error> {
        self.lines
            .lock()
            .await
            .iter()
            .map(|line| Event::from_line(line))
            .collect()
    }

    async fn append(&self, event: &Event) -> Result<(), Error> {
        let line = event.to_line()?;
        self.lines.lock().await.push(line);
        Ok(())
    }
}

/// A table stored as a JSON lines file, `<directory>/<table>.json`, one record per line.
///
/// Appends are written through immediately, so other processes observe them on their next scan.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Opens the table `table` in `directory`, creating the directory if needed. A missing file is
    /// an empty table.
    pub async fn open(directory: impl AsRef<Path>, table: &str) -> Result<Self, Error> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).await?;
        Ok(Self {
            path: directory.join(format!("{table}.json")),
        })
    }

    /// The path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn scan(&self) -> Result<Vec<Event>, Error> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Event::from_line)
            .collect()
    }

    async fn append(&self, event: &Event) -> Result<(), Error> {
        let mut line = event.to_line()?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;

    fn event(version: i64) -> Event {
        Event {
            id: "p1".into(),
            version,
            event_type: "PollOpened".into(),
            timestamp: 1486332455,
            data: None,
            snapshot: None,
        }
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_table() {
        let directory = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(directory.path(), "events").await.unwrap();

        assert!(backend.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn appended_records_are_written_one_per_line() {
        let directory = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(directory.path(), "events").await.unwrap();

        backend.append(&event(1)).await.unwrap();
        backend.append(&event(2)).await.unwrap();

        let contents = std::fs::read_to_string(backend.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(backend.scan().await.unwrap(), vec![event(1), event(2)]);
    }

    #[tokio::test]
    async fn snapshot_records_are_scanned_as_written() {
        let directory = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(directory.path(), "events").await.unwrap();
        backend.append(&event(1)).await.unwrap();
        let mut snapshotted = event(1);
        snapshotted.snapshot = Some(Payload::from_json(r#"{"is_open":true}"#).unwrap());

        backend.append(&snapshotted).await.unwrap();

        assert_eq!(backend.scan().await.unwrap(), vec![event(1), snapshotted]);
    }

    #[tokio::test]
    async fn memory_clones_share_the_table() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();

        backend.append(&event(1)).await.unwrap();

        assert_eq!(clone.scan().await.unwrap(), vec![event(1)]);
    }

    #[test]
    fn memory_table_rejects_malformed_lines() {
        assert!(MemoryBackend::from_lines("{\"id\":").is_err());
    }
}
