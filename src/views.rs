//! Storage of materialized read models.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use crate::{Error, Payload};

/// A materialized read model, stored under a well-known id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRow {
    /// The row id.
    pub id: String,
    /// The serialized view.
    pub data: Payload,
}

impl ViewRow {
    /// Serializes a view under `id`.
    pub fn encode<T: Serialize + ?Sized>(id: impl Into<String>, view: &T) -> Result<Self, Error> {
        Ok(Self {
            id: id.into(),
            data: Payload::encode(view)?,
        })
    }
}

/// Stores [view rows](ViewRow) by id.
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Reads a row. Fails with [Error::RowNotFound] when no row has this id.
    async fn get(&self, id: &str) -> Result<ViewRow, Error>;

    /// Creates or replaces a row.
    async fn put(&self, row: ViewRow) -> Result<(), Error>;
}

/// A view store held in memory.
#[derive(Debug, Default)]
pub struct MemoryViewStore {
    rows: Mutex<BTreeMap<String, ViewRow>>,
}

impl MemoryViewStore {
    /// Creates an empty view store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ViewStore for MemoryViewStore {
    async fn get(&self, id: &str) -> Result<ViewRow, Error> {
        self.rows
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::RowNotFound(id.to_string()))
    }

    async fn put(&self, row: ViewRow) -> Result<(), Error> {
        self.rows.lock().await.insert(row.id.clone(), row);
        Ok(())
    }
}

/// A view store kept in `<directory>/views.json`, one row per line. The file is rewritten on every
/// put.
#[derive(Debug)]
pub struct FileViewStore {
    path: PathBuf,
    rows: Mutex<BTreeMap<String, ViewRow>>,
}

impl FileViewStore {
    /// Opens the view store of `directory`, loading the existing rows.
    pub async fn open(directory: impl AsRef<Path>) -> Result<Self, Error> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory).await?;
        let path = directory.join("views.json");
        let rows = match fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| -> Result<(String, ViewRow), Error> {
                    let row: ViewRow = serde_json::from_str(line)?;
                    Ok((row.id.clone(), row))
                })
                .collect::<Result<_, _>>()?,
            Err(error) if error.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(error.into()),
        };
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }
}

#[async_trait]
impl ViewStore for FileViewStore {
    async fn get(&self, id: &str) -> Result<ViewRow, Error> {
        self.rows
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::RowNotFound(id.to_string()))
    }

    async fn put(&self, row: ViewRow) -> Result<(), Error> {
        let mut rows = self.rows.lock().await;
        rows.insert(row.id.clone(), row);
        let mut contents = String::new();
        for row in rows.values() {
            contents.push_str(&serde_json::to_string(row)?);
            contents.push('\n');
        }
        let temporary = self.path.with_extension("json.tmp");
        fs::write(&temporary, contents).await?;
        fs::rename(&temporary, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = MemoryViewStore::new();

        assert!(matches!(
            store.get("OpenPolls").await,
            Err(Error::RowNotFound(id)) if id == "OpenPolls"
        ));
    }

    #[tokio::test]
    async fn put_replaces_a_row() {
        let store = MemoryViewStore::new();
        store.put(ViewRow::encode("OpenPolls", &["p1"]).unwrap()).await.unwrap();

        store.put(ViewRow::encode("OpenPolls", &["p2"]).unwrap()).await.unwrap();

        let row = store.get("OpenPolls").await.unwrap();
        assert_eq!(row.data.as_str(), r#"["p2"]"#);
    }

    #[tokio::test]
    async fn file_rows_survive_a_reopen() {
        let directory = tempfile::tempdir().unwrap();
        let store = FileViewStore::open(directory.path()).await.unwrap();
        store.put(ViewRow::encode("OpenPolls", &["p1"]).unwrap()).await.unwrap();
        store.put(ViewRow::encode("Other", &1).unwrap()).await.unwrap();

        let reopened = FileViewStore::open(directory.path()).await.unwrap();

        assert_eq!(
            reopened.get("OpenPolls").await.unwrap().data.as_str(),
            r#"["p1"]"#
        );
        assert_eq!(reopened.get("Other").await.unwrap().data.as_str(), "1");
    }
}
