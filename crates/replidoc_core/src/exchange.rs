//! Changeset transport.
//!
//! A replica talks to its primary through [`ChangesetExchange`]: one
//! changeset in, one result out. [`HttpExchange`] is the real transport
//! (multipart POST against the sync server); [`LocalExchange`] wires a
//! replica directly to an in-process [`Primary`] for tests and embedded
//! use.

use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};

use crate::changeset::{AttachmentPayloads, Changeset, ChangesetResult};
use crate::error::{ReplidocError, Result};
use crate::primary::Primary;

/// One sync round trip against a primary.
pub trait ChangesetExchange {
    /// Propose `changeset` (with payloads for its new attachments) and
    /// return the primary's answer.
    fn exchange(
        &self,
        changeset: Changeset,
        payloads: &AttachmentPayloads,
    ) -> Result<ChangesetResult>;
}

/// Direct exchange against an in-process [`Primary`].
pub struct LocalExchange<'a> {
    primary: &'a Primary,
}

impl<'a> LocalExchange<'a> {
    /// Wrap a primary
    pub fn new(primary: &'a Primary) -> Self {
        LocalExchange { primary }
    }
}

impl ChangesetExchange for LocalExchange<'_> {
    fn exchange(
        &self,
        changeset: Changeset,
        payloads: &AttachmentPayloads,
    ) -> Result<ChangesetResult> {
        self.primary.apply_changeset(changeset, payloads)
    }
}

/// HTTP exchange against a sync server's `/api/changeset` endpoint.
///
/// The changeset travels as a multipart form: a `changeset` text field
/// holding the JSON body plus one file part per new attachment, keyed
/// by attachment id. Transport and server failures surface as
/// [`ReplidocError::SyncFailure`].
pub struct HttpExchange {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl HttpExchange {
    /// Build an exchange against `base_url`, authenticating every
    /// request with the session `token`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|err| ReplidocError::SyncFailure(format!("http client setup failed: {err}")))?;

        Ok(HttpExchange {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }
}

impl ChangesetExchange for HttpExchange {
    fn exchange(
        &self,
        changeset: Changeset,
        payloads: &AttachmentPayloads,
    ) -> Result<ChangesetResult> {
        let json = serde_json::to_string(&changeset)?;
        let mut form = Form::new().text("changeset", json);

        for attachment in &changeset.attachments {
            let Some(payload) = payloads.get(&attachment.id) else {
                return Err(ReplidocError::Validation(format!(
                    "missing payload for new attachment {}",
                    attachment.id
                )));
            };

            let part = Part::bytes(payload.clone())
                .file_name(attachment.id.as_str().to_string())
                .mime_str(&attachment.mime_type)
                .map_err(|err| {
                    ReplidocError::Validation(format!(
                        "attachment {} has invalid mime type {}: {err}",
                        attachment.id, attachment.mime_type
                    ))
                })?;
            form = form.part(attachment.id.as_str().to_string(), part);
        }

        let response = self
            .client
            .post(format!("{}/api/changeset", self.base_url))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .map_err(|err| ReplidocError::SyncFailure(format!("changeset request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = format!("primary rejected changeset: {status} {body}");
            // the server answers 409 for protocol violations (fatal)
            // and 400 for validation rejections; everything else is a
            // retryable transport/server failure
            return Err(match status {
                StatusCode::CONFLICT => ReplidocError::ProtocolViolation(message),
                StatusCode::BAD_REQUEST => ReplidocError::Validation(message),
                _ => ReplidocError::SyncFailure(message),
            });
        }

        response
            .json()
            .map_err(|err| ReplidocError::SyncFailure(format!("malformed changeset result: {err}")))
    }
}
