use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use duo_chat_core::{ChatError, InfraResultExt, build_object_key, current_millis};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::domain::model::{StoredAttachment, UploadRequest};
use crate::domain::repository::AttachmentStore;

const DEFAULT_ENDPOINT: &str = "https://firebasestorage.googleapis.com/v0";

/// Cloud Storage for Firebase 上传响应（只取需要的字段）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    name: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    download_tokens: Option<String>,
}

/// Firebase Storage 附件存储
///
/// 通过 REST 接口以 `uploadType=media` 直接上传，并用下载令牌拼出公开地址
#[derive(Clone)]
pub struct FirebaseStorageStore {
    client: Client,
    endpoint: String,
    bucket: String,
    prefix: String,
}

impl FirebaseStorageStore {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT, bucket, prefix)
    }

    /// 指定接口地址（本地模拟器使用）
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(60))
            .build()
            .context("build storage http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            prefix: prefix.into(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/b/{}/o", self.endpoint, self.bucket)
    }

    /// 下载地址：对象名整体作为一个路径段编码（`/` 编码为 `%2F`）
    fn download_url(&self, name: &str, token: Option<&str>) -> Result<String> {
        let mut url = Url::parse(&self.upload_url()).context("parse storage endpoint")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("storage endpoint cannot be a base url"))?
            .push(name);
        url.query_pairs_mut().append_pair("alt", "media");
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.to_string())
    }

    async fn put_object(&self, object_key: &str, request: &UploadRequest<'_>) -> Result<ObjectMetadata> {
        let response = self
            .client
            .post(self.upload_url())
            .query(&[("uploadType", "media"), ("name", object_key)])
            .header(CONTENT_TYPE, request.content_type)
            .body(request.payload.to_vec())
            .send()
            .await
            .with_context(|| format!("upload object {}", object_key))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("storage responded {}: {}", status, body));
        }

        response
            .json::<ObjectMetadata>()
            .await
            .context("decode storage upload response")
    }
}

#[async_trait::async_trait]
impl AttachmentStore for FirebaseStorageStore {
    #[instrument(skip(self, request), fields(file_name = request.file_name, size = request.payload.len()))]
    async fn upload(&self, request: &UploadRequest<'_>) -> duo_chat_core::Result<StoredAttachment> {
        let object_key = build_object_key(&self.prefix, current_millis(), request.file_name);
        let metadata = self
            .put_object(&object_key, request)
            .await
            .into_chat(ChatError::StoreUnavailable)?;

        // 多个令牌以逗号分隔，取第一个
        let token = metadata
            .download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').next())
            .filter(|token| !token.is_empty());
        let url = self
            .download_url(&metadata.name, token)
            .into_chat(ChatError::StoreUnavailable)?;
        debug!(object_key = %metadata.name, "附件已上传到 Firebase Storage");

        Ok(StoredAttachment {
            url,
            content_type: metadata
                .content_type
                .unwrap_or_else(|| request.content_type.to_string()),
            object_key: metadata.name,
            size: request.payload.len() as u64,
        })
    }

    fn backend(&self) -> &'static str {
        "firebase"
    }
}
