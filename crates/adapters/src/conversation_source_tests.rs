// SPDX-License-Identifier: MIT

use super::*;
use tokio::io::AsyncReadExt;

fn msg(id: &str, epoch_ms: u64, body: &str) -> Message {
    Message {
        message_id: id.to_string(),
        epoch_ms,
        author: "alice".to_string(),
        body: body.to_string(),
        attachment: None,
    }
}

#[tokio::test]
async fn page_returns_scripted_page() {
    let source = FakeConversationSource::new();
    source.set_page(
        "c1",
        "",
        Page { messages: vec![msg("m1", 1, "hi")], next_cursor: "cur1".to_string(), last: false },
    );

    let page = source.page("c1", "").await.unwrap();

    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.next_cursor, "cur1");
    assert!(!page.last);
}

#[tokio::test]
async fn page_follows_forward_cursor_chain() {
    let source = FakeConversationSource::new();
    source.set_page(
        "c1",
        "",
        Page { messages: vec![msg("m1", 1, "hi")], next_cursor: "cur1".to_string(), last: false },
    );
    source.set_page(
        "c1",
        "cur1",
        Page { messages: vec![msg("m2", 2, "bye")], next_cursor: "cur2".to_string(), last: true },
    );

    let first = source.page("c1", "").await.unwrap();
    let second = source.page("c1", &first.next_cursor).await.unwrap();

    assert!(second.last);
    assert_eq!(second.messages[0].message_id, "m2");
}

#[tokio::test]
async fn page_unknown_container_errors() {
    let source = FakeConversationSource::new();

    let result = source.page("missing", "").await;

    assert!(matches!(result, Err(ConversationError::NotFound(_))));
}

#[tokio::test]
async fn attachment_fetch_returns_bytes() {
    let source = FakeAttachmentSource::new();
    source.add("att-1", b"file bytes".to_vec());

    let mut reader = source.fetch("att-1").await.unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();

    assert_eq!(buf, b"file bytes");
}

#[tokio::test]
async fn attachment_fetch_missing_errors() {
    let source = FakeAttachmentSource::new();

    let result = source.fetch("missing").await;

    assert!(matches!(result, Err(ConversationError::NotFound(_))));
}

#[test]
fn attachment_dest_filename_matches_naming_convention() {
    let attachment =
        Attachment { attachment_id: "att-1".to_string(), source_filename: "photo.png".to_string() };

    let name = attachment.dest_filename(1_700_000_000_000, "msg-7");

    assert_eq!(name, "1700000000000-msg-7-photo.png");
}
