//! Durable archival of advice documents to a Drive-style storage API.

use std::path::Path;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ArchiveError;

/// A successfully archived document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    pub id: String,
    pub url: String,
}

/// Seam for the archival storage service.
#[async_trait]
pub trait ArchiveClient: Send + Sync {
    /// Find or create the archival folder, returning its id.
    async fn ensure_folder(&self, name: &str) -> Result<String, ArchiveError>;

    /// Upload one local file into the folder.
    async fn upload(
        &self,
        folder_id: &str,
        path: &Path,
        mime_type: &str,
    ) -> Result<ArchivedFile, ArchiveError>;
}

/// Archive client backed by the Google Drive v3 REST API.
pub struct DriveArchive {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    /// Configured folder id, skipping the find-or-create lookup.
    folder_id: Option<String>,
}

impl DriveArchive {
    /// Build from config; `None` when no archive token is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let token = config.archive_api_token.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            base_url: config.archive_base_url.trim_end_matches('/').to_string(),
            token,
            folder_id: config.archive_folder_id.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileMeta>,
}

#[derive(Debug, Deserialize)]
struct FileMeta {
    id: String,
    #[serde(rename = "webViewLink", default)]
    web_view_link: Option<String>,
}

#[async_trait]
impl ArchiveClient for DriveArchive {
    async fn ensure_folder(&self, name: &str) -> Result<String, ArchiveError> {
        if let Some(id) = &self.folder_id {
            return Ok(id.clone());
        }

        let query = format!(
            "mimeType='application/vnd.google-apps.folder' and name='{}' and trashed=false",
            name.replace('\'', "\\'")
        );
        let response = self
            .http
            .get(format!("{}/files", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .query(&[("q", query.as_str()), ("fields", "files(id)")])
            .send()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArchiveError::Folder(format!(
                "folder query returned {}",
                response.status()
            )));
        }
        let list: FileList = response
            .json()
            .await
            .map_err(|e| ArchiveError::Folder(e.to_string()))?;
        if let Some(existing) = list.files.first() {
            debug!(folder = name, id = %existing.id, "Archive folder found");
            return Ok(existing.id.clone());
        }

        let response = self
            .http
            .post(format!("{}/files", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(&json!({
                "name": name,
                "mimeType": "application/vnd.google-apps.folder",
            }))
            .send()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArchiveError::Folder(format!(
                "folder create returned {}",
                response.status()
            )));
        }
        let created: FileMeta = response
            .json()
            .await
            .map_err(|e| ArchiveError::Folder(e.to_string()))?;
        info!(folder = name, id = %created.id, "Archive folder created");
        Ok(created.id)
    }

    async fn upload(
        &self,
        folder_id: &str,
        path: &Path,
        mime_type: &str,
    ) -> Result<ArchivedFile, ArchiveError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let bytes = tokio::fs::read(path).await.map_err(|e| ArchiveError::Upload {
            filename: filename.clone(),
            reason: e.to_string(),
        })?;

        let metadata = json!({ "name": filename, "parents": [folder_id] });
        let form = reqwest::multipart::Form::new()
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata.to_string())
                    .mime_str("application/json")
                    .map_err(|e| ArchiveError::Http(e.to_string()))?,
            )
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(filename.clone())
                    .mime_str(mime_type)
                    .map_err(|e| ArchiveError::Http(e.to_string()))?,
            );

        // The v3 multipart upload endpoint lives under /upload.
        let upload_url = format!(
            "{}/files?uploadType=multipart&fields=id,webViewLink",
            self.base_url.replace("/drive/v3", "/upload/drive/v3")
        );
        let response = self
            .http
            .post(upload_url)
            .bearer_auth(self.token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ArchiveError::Http(e.to_string()))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {}
            status => {
                return Err(ArchiveError::Upload {
                    filename,
                    reason: format!("upload returned {status}"),
                });
            }
        }
        let meta: FileMeta = response.json().await.map_err(|e| ArchiveError::Upload {
            filename: filename.clone(),
            reason: e.to_string(),
        })?;
        let url = meta
            .web_view_link
            .unwrap_or_else(|| format!("drive://{}", meta.id));
        info!(%filename, id = %meta.id, "Document archived");
        Ok(ArchivedFile { id: meta.id, url })
    }
}
