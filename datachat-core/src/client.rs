use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use secrecy::ExposeSecret;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ApiCfg, Config, StreamCfg};
use crate::error::{CoreResult, DataChatError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{ChatTurn, UploadResponse};
use crate::stream::{consume, UpdateStream};

/// File types the backend can ingest: (extension, MIME type).
pub const ACCEPTED_UPLOADS: [(&str, &str); 2] = [
    ("csv", "text/csv"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
];

/// MIME type for an upload candidate, or a validation error for anything but CSV/XLSX.
pub fn upload_mime(path: &Path) -> CoreResult<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    ACCEPTED_UPLOADS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .ok_or_else(|| DataChatError::Validation("Only CSV and XLSX files are allowed.".into()))
}

/// Anything that can answer a chat turn with a stream of updates.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn open_chat(&self, turn: &ChatTurn) -> CoreResult<UpdateStream>;
}

/// HTTP client for the upload and chat endpoints.
#[derive(Debug, Clone)]
pub struct DataChatClient {
    http: HttpClient,
    api: ApiCfg,
    stream: StreamCfg,
}

impl DataChatClient {
    pub fn new(http: HttpClient, api: ApiCfg, stream: StreamCfg) -> Self {
        Self { http, api, stream }
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        cfg.validate()?;
        Ok(Self::new(
            HttpClient::new(&cfg.http)?,
            cfg.api.clone(),
            cfg.stream.clone(),
        ))
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        Self::new(
            HttpClient::new_default().unwrap(),
            ApiCfg {
                base_url: server_base.to_string(),
                ..ApiCfg::default()
            },
            StreamCfg::default(),
        )
    }

    /// Upload a CSV/XLSX file; the returned key identifies the dataset in later chats.
    pub async fn upload(&self, path: &Path) -> CoreResult<UploadResponse> {
        let mime = upload_mime(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let data = tokio::fs::read(path).await?;
        let size = data.len();
        let part = Part::bytes(data)
            .file_name(file_name.clone())
            .mime_str(mime)
            .map_err(|e| DataChatError::Other(e.into()))?;
        let form = Form::new().part("file", part);

        let url = self.api.upload_url();
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("upload", file = %file_name, bytes = size, request_id = %request_id);
        let ctx = RequestCtx {
            request_id: Some(&request_id),
        };
        let (resp, backend_request_id, latency_ms) = self
            .http
            .post_multipart_json::<UploadResponse>(&url, form, &ctx)
            .instrument(span)
            .await?;
        if resp.redis_key.trim().is_empty() {
            return Err(DataChatError::Validation(
                "upload response carried an empty redis_key".into(),
            ));
        }
        tracing::info!(
            file = %file_name,
            latency_ms,
            backend_request_id = backend_request_id.as_deref().unwrap_or("-"),
            "file processed"
        );
        Ok(resp)
    }
}

#[async_trait]
impl ChatBackend for DataChatClient {
    async fn open_chat(&self, turn: &ChatTurn) -> CoreResult<UpdateStream> {
        let key = turn.dataset_key.expose_secret();
        if key.trim().is_empty() {
            return Err(DataChatError::MissingKey);
        }
        let mut form = Form::new()
            .text("redis_key", key.to_string())
            .text("message", turn.message.clone());
        if let Some(sid) = turn.session_id.as_deref().filter(|s| !s.is_empty()) {
            form = form.text("session_id", sid.to_string());
        }

        let url = self.api.chat_url();
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "chat",
            message_len = turn.message.len(),
            resumed = turn.session_id.is_some(),
            request_id = %request_id
        );
        let ctx = RequestCtx {
            request_id: Some(&request_id),
        };
        let body = self
            .http
            .post_multipart_stream(&url, form, &ctx)
            .instrument(span)
            .await?;
        Ok(consume(body, &self.stream)?.boxed())
    }
}
