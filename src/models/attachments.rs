use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::attachments;

/// How an attachment reaches the model: embedded inline in the prompt, or
/// referenced by an id in the provider's file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMethod {
    Inline,
    Remote,
}

impl ProcessingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMethod::Inline => "inline",
            ProcessingMethod::Remote => "remote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inline" => Some(ProcessingMethod::Inline),
            "remote" => Some(ProcessingMethod::Remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, Insertable)]
#[diesel(table_name = attachments)]
pub struct Attachment {
    pub id: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub local_path: String,
    pub processing_method: String,
    pub uploaded_at: Option<NaiveDateTime>,
    pub remote_file_id: Option<String>,
    pub remote_uploaded_at: Option<NaiveDateTime>,
    pub remote_expires_at: Option<NaiveDateTime>,
}

/// The provider's file store keeps uploads for 48 hours. Expiry is recorded
/// slightly earlier so a reference is never handed out right at the edge.
pub fn remote_expiry_from(uploaded_at: NaiveDateTime) -> NaiveDateTime {
    uploaded_at + Duration::hours(47) + Duration::minutes(55)
}

impl Attachment {
    pub fn method(&self) -> Option<ProcessingMethod> {
        ProcessingMethod::parse(&self.processing_method)
    }

    /// True when the remote copy expires within `window` from now (or has
    /// already expired). Attachments without a remote copy never match.
    pub fn remote_expires_within(&self, window: Duration) -> bool {
        match self.remote_expires_at {
            Some(expiry) => Utc::now().naive_utc() + window >= expiry,
            None => false,
        }
    }
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = attachments)]
pub struct NewAttachment {
    pub id: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub local_path: String,
    pub processing_method: String,
}
