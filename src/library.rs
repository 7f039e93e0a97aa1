//! Book library: identity, records, raw content, covers.
//!
//! Book identity is derived from file metadata, not content:
//! `filename-byteSize-modifiedEpochMs`. Two distinct files that share all
//! three collide and the later import wins; that is an accepted
//! limitation, not defended against.

use crate::annotations::BookRecord;
use crate::error::Result;
use crate::store::{AnnotationRepository, Namespace};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Join key for every persisted record of one book.
pub fn derive_book_id(file_name: &str, byte_size: u64, modified_epoch_ms: i64) -> String {
    format!("{file_name}-{byte_size}-{modified_epoch_ms}")
}

pub struct Library {
    repo: Arc<AnnotationRepository>,
}

impl Library {
    pub fn new(repo: Arc<AnnotationRepository>) -> Self {
        Self { repo }
    }

    /// Import a book: record, raw bytes, and optional cover image. An
    /// import under an existing identity overwrites it.
    pub async fn add_book(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        modified_epoch_ms: i64,
        title: impl Into<String>,
        author: Option<String>,
        cover: Option<Vec<u8>>,
    ) -> Result<BookRecord> {
        let id = derive_book_id(file_name, bytes.len() as u64, modified_epoch_ms);
        let record = BookRecord {
            id: id.clone(),
            title: title.into(),
            author,
            added_at: Utc::now(),
        };
        self.repo
            .write_through(Namespace::Books, &id, serde_json::to_vec(&record)?)
            .await?;
        self.repo.write_through(Namespace::Files, &id, bytes).await?;
        if let Some(cover) = cover {
            if let Err(err) = self.repo.write_through(Namespace::Covers, &id, cover).await {
                warn!(%err, book_id = %id, "Cover image could not be stored");
            }
        }
        info!(book_id = %id, title = %record.title, "Added book to library");
        Ok(record)
    }

    pub async fn book(&self, book_id: &str) -> Result<Option<BookRecord>> {
        match self.repo.read_through(Namespace::Books, book_id).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// All book records, most recently added first. Unreadable records
    /// are skipped rather than failing the whole listing.
    pub async fn books(&self) -> Result<Vec<BookRecord>> {
        let mut records = Vec::new();
        for key in self.repo.list_keys(Namespace::Books).await? {
            match self.repo.read_through(Namespace::Books, &key).await? {
                Some(raw) => match serde_json::from_slice::<BookRecord>(&raw) {
                    Ok(record) => records.push(record),
                    Err(err) => warn!(%err, key, "Skipping unreadable book record"),
                },
                None => {}
            }
        }
        records.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(records)
    }

    pub async fn load_file(&self, book_id: &str) -> Result<Option<Vec<u8>>> {
        self.repo.read_through(Namespace::Files, book_id).await
    }

    pub async fn load_cover(&self, book_id: &str) -> Result<Option<Vec<u8>>> {
        self.repo.read_through(Namespace::Covers, book_id).await
    }

    /// Remove the book and everything keyed to it, through the
    /// repository's cascade.
    pub async fn delete_book(&self, book_id: &str) -> Result<()> {
        self.repo.delete_book(book_id).await
    }
}
