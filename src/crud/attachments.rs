use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::database::db::DbPool;
use crate::models::attachments::remote_expiry_from;
use crate::models::{Attachment, NewAttachment};
use crate::schema::attachments;

pub async fn create_attachment(pool: &DbPool, new: NewAttachment) -> Result<Attachment> {
    let mut conn = pool.get().await?;

    let attachment: Attachment = diesel::insert_into(attachments::table)
        .values(&new)
        .get_result(&mut conn)
        .await?;

    Ok(attachment)
}

pub async fn get_attachment(pool: &DbPool, attachment_id: &str) -> Result<Option<Attachment>> {
    let mut conn = pool.get().await?;

    let attachment = attachments::table
        .find(attachment_id)
        .first::<Attachment>(&mut conn)
        .await
        .optional()?;

    Ok(attachment)
}

/// Records a fresh remote-store upload for an attachment. The expiry is
/// derived from the upload time, never stored independently.
pub async fn update_remote_info(
    pool: &DbPool,
    attachment_id: &str,
    remote_file_id: &str,
) -> Result<Option<Attachment>> {
    let mut conn = pool.get().await?;

    let now = Utc::now().naive_utc();
    let attachment = diesel::update(attachments::table.find(attachment_id))
        .set((
            attachments::remote_file_id.eq(remote_file_id),
            attachments::remote_uploaded_at.eq(now),
            attachments::remote_expires_at.eq(remote_expiry_from(now)),
        ))
        .get_result::<Attachment>(&mut conn)
        .await
        .optional()?;

    Ok(attachment)
}
