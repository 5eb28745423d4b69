use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::Duration;
use log::{error, warn};
use regex::Regex;

use crate::llm::{ModelClient, PromptPart};
use crate::models::{Attachment, ProcessingMethod};
use crate::store::ChatStore;

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Remote references are refreshed when their expiry is this close.
fn refresh_window() -> Duration {
    Duration::hours(1)
}

/// Expands one attachment into prompt parts according to its content type
/// and processing classification. Returns `None` when the attachment
/// cannot contribute; the caller continues with the rest of the context.
pub async fn expand_attachment(
    store: &dyn ChatStore,
    model: &dyn ModelClient,
    attachment: &Attachment,
) -> Option<Vec<PromptPart>> {
    match prepare_parts(store, model, attachment).await {
        Ok(parts) => Some(parts),
        Err(e) => {
            error!("error preparing attachment {}: {e}", attachment.id);
            None
        }
    }
}

async fn prepare_parts(
    store: &dyn ChatStore,
    model: &dyn ModelClient,
    attachment: &Attachment,
) -> Result<Vec<PromptPart>> {
    let context_part = PromptPart::Text(format!(
        "[Attached file: {}, type: {}]",
        attachment.original_filename, attachment.content_type
    ));

    if attachment.content_type == "text/plain" {
        let bytes = tokio::fs::read(&attachment.local_path).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        return Ok(vec![context_part, PromptPart::Text(text)]);
    }

    if attachment.content_type == DOCX_MIME {
        let path = attachment.local_path.clone();
        let text = tokio::task::spawn_blocking(move || extract_docx_text(Path::new(&path)))
            .await
            .map_err(|e| anyhow!("docx extraction task failed: {e}"))??;
        return Ok(vec![context_part, PromptPart::Text(text)]);
    }

    match attachment.method() {
        Some(ProcessingMethod::Inline) => {
            let data = tokio::fs::read(&attachment.local_path).await?;
            Ok(vec![
                context_part,
                PromptPart::InlineData {
                    mime_type: attachment.content_type.clone(),
                    data,
                },
            ])
        }
        Some(ProcessingMethod::Remote) => {
            let file_id = refresh_remote_file_if_needed(store, model, attachment).await?;
            Ok(vec![
                context_part,
                PromptPart::RemoteRef {
                    file_id,
                    mime_type: attachment.content_type.clone(),
                },
            ])
        }
        None => Err(anyhow!(
            "unknown processing method {:?} for attachment {}",
            attachment.processing_method,
            attachment.id
        )),
    }
}

/// Returns a usable remote file reference, re-uploading the local copy
/// once when the current reference expires within the refresh window. On
/// re-upload failure the stale reference is reused rather than failing
/// the whole turn.
pub async fn refresh_remote_file_if_needed(
    store: &dyn ChatStore,
    model: &dyn ModelClient,
    attachment: &Attachment,
) -> Result<String> {
    match &attachment.remote_file_id {
        Some(current) if !attachment.remote_expires_within(refresh_window()) => {
            Ok(current.clone())
        }
        Some(current) => {
            match upload_and_record(store, model, attachment).await {
                Ok(fresh) => Ok(fresh),
                Err(e) => {
                    warn!(
                        "failed to refresh remote copy of {}: {e}, reusing stale reference",
                        attachment.original_filename
                    );
                    Ok(current.clone())
                }
            }
        }
        // Never uploaded; one attempt, failure is fatal for this attachment.
        None => upload_and_record(store, model, attachment).await,
    }
}

async fn upload_and_record(
    store: &dyn ChatStore,
    model: &dyn ModelClient,
    attachment: &Attachment,
) -> Result<String> {
    let file_id = model
        .upload_file(
            Path::new(&attachment.local_path),
            &attachment.original_filename,
            &attachment.content_type,
        )
        .await?;
    store.record_remote_upload(&attachment.id, &file_id).await?;
    Ok(file_id)
}

/// A docx file is a zip archive; the body text lives in
/// `word/document.xml`. Paragraph boundaries become newlines, every other
/// tag is dropped.
pub fn extract_docx_text(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")?
        .read_to_string(&mut xml)?;

    let xml = xml.replace("</w:p>", "\n");
    let tags = Regex::new(r"<[^>]+>")?;
    let text = tags.replace_all(&xml, "");

    Ok(text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .trim()
        .to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use futures::StreamExt;

    use super::*;
    use crate::llm::{FragmentStream, PromptTurn};
    use crate::models::attachments::remote_expiry_from;
    use crate::store::testing::MemoryStore;

    pub struct CountingUploadClient {
        pub uploads: Arc<AtomicUsize>,
        pub fail_uploads: bool,
    }

    #[async_trait]
    impl ModelClient for CountingUploadClient {
        async fn stream_generate(
            &self,
            _turns: Vec<PromptTurn>,
            _system_instruction: &str,
        ) -> Result<FragmentStream> {
            Ok(futures::stream::empty().boxed())
        }

        async fn upload_file(
            &self,
            _path: &Path,
            _display_name: &str,
            _mime_type: &str,
        ) -> Result<String> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail_uploads {
                Err(anyhow!("upload rejected"))
            } else {
                Ok("files/fresh".to_string())
            }
        }
    }

    fn remote_attachment(expires_in: Duration) -> Attachment {
        let now = Utc::now().naive_utc();
        Attachment {
            id: "a1".to_string(),
            original_filename: "large.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 9_000_000,
            local_path: "/tmp/does-not-matter.pdf".to_string(),
            processing_method: "remote".to_string(),
            uploaded_at: Some(now),
            remote_file_id: Some("files/stale".to_string()),
            remote_uploaded_at: Some(now),
            remote_expires_at: Some(now + expires_in),
        }
    }

    #[tokio::test]
    async fn near_expiry_triggers_exactly_one_reupload() {
        let store = MemoryStore::with_chat(1);
        let attachment = remote_attachment(Duration::minutes(30));
        store.add_attachment(attachment.clone());
        let uploads = Arc::new(AtomicUsize::new(0));
        let client = CountingUploadClient {
            uploads: uploads.clone(),
            fail_uploads: false,
        };

        let file_id = refresh_remote_file_if_needed(&store, &client, &attachment)
            .await
            .unwrap();

        assert_eq!(file_id, "files/fresh");
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        let updated = store.attachment("a1").unwrap();
        assert_eq!(updated.remote_file_id.as_deref(), Some("files/fresh"));
        let expiry = updated.remote_expires_at.unwrap();
        assert_eq!(expiry, remote_expiry_from(updated.remote_uploaded_at.unwrap()));
    }

    #[tokio::test]
    async fn fresh_reference_is_reused_without_upload() {
        let store = MemoryStore::with_chat(1);
        let attachment = remote_attachment(Duration::hours(20));
        store.add_attachment(attachment.clone());
        let uploads = Arc::new(AtomicUsize::new(0));
        let client = CountingUploadClient {
            uploads: uploads.clone(),
            fail_uploads: false,
        };

        let file_id = refresh_remote_file_if_needed(&store, &client, &attachment)
            .await
            .unwrap();

        assert_eq!(file_id, "files/stale");
        assert_eq!(uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_stale_reference() {
        let store = MemoryStore::with_chat(1);
        let attachment = remote_attachment(Duration::minutes(10));
        store.add_attachment(attachment.clone());
        let client = CountingUploadClient {
            uploads: Arc::new(AtomicUsize::new(0)),
            fail_uploads: true,
        };

        let file_id = refresh_remote_file_if_needed(&store, &client, &attachment)
            .await
            .unwrap();

        assert_eq!(file_id, "files/stale");
    }

    #[tokio::test]
    async fn unknown_processing_method_is_an_error() {
        let store = MemoryStore::with_chat(1);
        let mut attachment = remote_attachment(Duration::hours(20));
        attachment.processing_method = "carrier-pigeon".to_string();
        let client = CountingUploadClient {
            uploads: Arc::new(AtomicUsize::new(0)),
            fail_uploads: false,
        };

        assert!(expand_attachment(&store, &client, &attachment).await.is_none());
    }
}
