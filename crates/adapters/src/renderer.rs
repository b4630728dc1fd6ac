// SPDX-License-Identifier: MIT

//! `PageRenderer` (§4.5): renders one page of messages to the
//! per-conversation writer. Kept as a trait boundary rather than a fixed
//! text format so the embedding application controls output shape without
//! touching the paging loop.

use crate::conversation_source::Message;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait PageRenderer: Send + Sync + 'static {
    /// Render `messages` (already reversed into descending time order by
    /// the caller) to `writer`, which is positioned at the current end of
    /// the per-conversation file.
    async fn render(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        messages: &[Message],
    ) -> Result<(), RenderError>;
}

/// Plain-text renderer: one line per message, `{epoch_ms} {author}: {body}`,
/// with a trailing note when the message carries an attachment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

#[async_trait]
impl PageRenderer for PlainTextRenderer {
    async fn render(
        &self,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        messages: &[Message],
    ) -> Result<(), RenderError> {
        use tokio::io::AsyncWriteExt;

        for message in messages {
            let mut line = format!("{} {}: {}", message.epoch_ms, message.author, message.body);
            if let Some(attachment) = &message.attachment {
                line.push_str(&format!(" [attachment: {}]", attachment.source_filename));
            }
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records every page it was asked to render, verbatim, without writing
    /// anything to the writer — lets tests assert on paging/ordering without
    /// depending on a text format.
    #[derive(Clone, Default)]
    pub struct RecordingRenderer {
        pub calls: Arc<Mutex<Vec<Vec<Message>>>>,
    }

    impl RecordingRenderer {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl PageRenderer for RecordingRenderer {
        async fn render(
            &self,
            _writer: &mut (dyn AsyncWrite + Send + Unpin),
            messages: &[Message],
        ) -> Result<(), RenderError> {
            self.calls.lock().push(messages.to_vec());
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::RecordingRenderer;

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod tests;
