// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! archive-adapters: the port traits named in §4.5 for the engine's
//! external collaborators (content source, conversation pager, attachment
//! fetcher, page renderer), plus deterministic in-memory fakes behind the
//! `test-support` feature.

pub mod content_source;
pub mod conversation_source;
pub mod renderer;

pub use content_source::{ContentSource, EntryReader, SourceEntry, SourceError};
pub use conversation_source::{
    Attachment, AttachmentReader, AttachmentSource, ConversationError, ConversationSource, Message,
    Page,
};
pub use renderer::{PageRenderer, PlainTextRenderer, RenderError};

#[cfg(any(test, feature = "test-support"))]
pub use content_source::FakeContentSource;
#[cfg(any(test, feature = "test-support"))]
pub use conversation_source::{FakeAttachmentSource, FakeConversationSource};
#[cfg(any(test, feature = "test-support"))]
pub use renderer::RecordingRenderer;
