// SPDX-License-Identifier: MIT

//! Paged conversation archival (§4.3.3): a specialisation of copying where
//! the "entry" is a conversation and its bytes come from a page-pull API
//! instead of a byte-range read.

use archive_adapters::{
    AttachmentSource, ConversationError, ConversationSource, PageRenderer, RenderError,
};
use archive_core::job::ContainerCheckpoint;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum PagedCopyError {
    #[error("paged copy cancelled")]
    Cancelled,
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Archive one conversation, page by page, resuming from `checkpoint`.
/// `on_progress` is invoked after each page with the updated checkpoint so
/// the caller can persist it under the registry lock.
#[allow(clippy::too_many_arguments)]
pub async fn run_paged_copy(
    container_id: &str,
    checkpoint: &mut ContainerCheckpoint,
    conversations: &dyn ConversationSource,
    attachments: &Arc<dyn AttachmentSource>,
    renderer: &dyn PageRenderer,
    workspace_dir: &Path,
    attachment_concurrency: usize,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(&ContainerCheckpoint),
) -> Result<(), PagedCopyError> {
    let text_path = workspace_dir.join(format!("{container_id}.txt"));
    if let Some(parent) = text_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&text_path)
        .await?;
    file.set_len(checkpoint.byte_offset).await?;
    file.seek(std::io::SeekFrom::Start(checkpoint.byte_offset)).await?;

    loop {
        if cancel.is_cancelled() {
            return Err(PagedCopyError::Cancelled);
        }
        if checkpoint.last {
            break;
        }

        let page = conversations.page(container_id, &checkpoint.cursor).await?;
        let mut messages = page.messages;
        messages.reverse();

        renderer.render(&mut file, &messages).await?;

        download_attachments(&messages, attachments, workspace_dir, attachment_concurrency, cancel).await?;

        file.flush().await?;
        file.sync_all().await?;

        let new_offset = file.metadata().await?.len();
        checkpoint.byte_offset = new_offset;
        checkpoint.cursor = page.next_cursor;
        checkpoint.last = page.last;
        checkpoint.page_size = messages.len() as u32;

        on_progress(checkpoint);
    }

    Ok(())
}

async fn download_attachments(
    messages: &[archive_adapters::Message],
    attachments: &Arc<dyn AttachmentSource>,
    workspace_dir: &Path,
    attachment_concurrency: usize,
    cancel: &CancellationToken,
) -> Result<(), PagedCopyError> {
    let with_attachments: Vec<(&archive_adapters::Attachment, u64, &str)> = messages
        .iter()
        .filter_map(|m| m.attachment.as_ref().map(|a| (a, m.epoch_ms, m.message_id.as_str())))
        .collect();

    for chunk in with_attachments.chunks(attachment_concurrency.max(1)) {
        if cancel.is_cancelled() {
            return Err(PagedCopyError::Cancelled);
        }
        let mut set: JoinSet<Result<(), PagedCopyError>> = JoinSet::new();
        for (attachment, epoch_ms, message_id) in chunk {
            let dest_name = attachment.dest_filename(*epoch_ms, message_id);
            let dest_path = dedupe_path(workspace_dir.join(&dest_name));
            let attachment_id = attachment.attachment_id.clone();
            let attachments = attachments.clone();
            set.spawn(async move {
                let mut reader = attachments.fetch(&attachment_id).await?;
                let mut file = tokio::fs::File::create(&dest_path).await?;
                tokio::io::copy(&mut reader, &mut file).await?;
                Ok(())
            });
        }
        while let Some(result) = set.join_next().await {
            match result {
                Ok(inner) => inner?,
                Err(e) => return Err(PagedCopyError::Io(std::io::Error::other(e))),
            }
        }
    }
    Ok(())
}

/// Appends a numeric ordinal before the extension on collision, per §4.3.3.
fn dedupe_path(mut path: std::path::PathBuf) -> std::path::PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    let mut ordinal = 1u32;
    loop {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem}-{ordinal}.{ext}"),
            None => format!("{stem}-{ordinal}"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            path = candidate;
            break;
        }
        ordinal += 1;
    }
    path
}

#[cfg(test)]
#[path = "paged_tests.rs"]
mod tests;
