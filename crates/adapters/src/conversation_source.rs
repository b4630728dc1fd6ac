// SPDX-License-Identifier: MIT

//! Trait boundary for the paged conversation archival variant (§4.3.3,
//! §4.5): pulling pages of messages by cursor, and fetching attachment
//! bytes for messages that carry one.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("conversation source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One message in a conversation, as returned by a page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub epoch_ms: u64,
    pub author: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

/// An attachment reference carried by a message; the bytes themselves are
/// fetched separately through `AttachmentSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub attachment_id: String,
    pub source_filename: String,
}

impl Attachment {
    /// Destination filename per §4.3.3: `{epoch_ms}-{message_id}-{source_filename}`.
    pub fn dest_filename(&self, message_epoch_ms: u64, message_id: &str) -> String {
        format!("{message_epoch_ms}-{message_id}-{}", self.source_filename)
    }
}

/// One page of messages plus the pagination state to continue or stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    pub next_cursor: String,
    pub last: bool,
}

#[async_trait]
pub trait ConversationSource: Send + Sync + 'static {
    /// Fetch the next page of messages for `container_id`, starting from
    /// `cursor` (empty string for the first page).
    async fn page(&self, container_id: &str, cursor: &str) -> Result<Page, ConversationError>;
}

pub type AttachmentReader = std::pin::Pin<Box<dyn AsyncRead + Send + Unpin>>;

#[async_trait]
pub trait AttachmentSource: Send + Sync + 'static {
    async fn fetch(&self, attachment_id: &str) -> Result<AttachmentReader, ConversationError>;
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Cursor as IoCursor;
    use std::sync::Arc;

    /// In-memory conversation source: pages are pre-scripted per
    /// `(container_id, cursor)` pair, so tests can model multi-page
    /// conversations and resumed paging deterministically.
    #[derive(Clone, Default)]
    pub struct FakeConversationSource {
        pages: Arc<Mutex<HashMap<(String, String), Page>>>,
    }

    impl FakeConversationSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_page(&self, container_id: impl Into<String>, cursor: impl Into<String>, page: Page) {
            self.pages
                .lock()
                .insert((container_id.into(), cursor.into()), page);
        }
    }

    #[async_trait]
    impl ConversationSource for FakeConversationSource {
        async fn page(&self, container_id: &str, cursor: &str) -> Result<Page, ConversationError> {
            self.pages
                .lock()
                .get(&(container_id.to_string(), cursor.to_string()))
                .cloned()
                .ok_or_else(|| ConversationError::NotFound(container_id.to_string()))
        }
    }

    #[derive(Clone, Default)]
    pub struct FakeAttachmentSource {
        bytes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl FakeAttachmentSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add(&self, attachment_id: impl Into<String>, contents: impl Into<Vec<u8>>) {
            self.bytes.lock().insert(attachment_id.into(), contents.into());
        }
    }

    #[async_trait]
    impl AttachmentSource for FakeAttachmentSource {
        async fn fetch(&self, attachment_id: &str) -> Result<AttachmentReader, ConversationError> {
            let bytes = self
                .bytes
                .lock()
                .get(attachment_id)
                .cloned()
                .ok_or_else(|| ConversationError::NotFound(attachment_id.to_string()))?;
            Ok(Box::pin(IoCursor::new(bytes)))
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeAttachmentSource, FakeConversationSource};

#[cfg(test)]
#[path = "conversation_source_tests.rs"]
mod tests;
