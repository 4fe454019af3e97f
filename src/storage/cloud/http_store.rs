//! HTTP document service backend.
//!
//! Documents live at `{base_url}/userData/{user}/{collection}/data`:
//! - `GET` returns the JSON document, `404` when it does not exist.
//! - `PUT` replaces the document with the request body.
//!
//! Any other status is reported as [`SyncError::CloudStatus`].
use futures::future::BoxFuture;
use futures::FutureExt;
use http::StatusCode;
use log::debug;

use crate::config::CloudConfig;
use crate::errors::{Result, SyncError};
use crate::storage::area::CloudStore;
use crate::storage::types::{CloudDocument, DocumentPath};

pub struct HttpCloudStore {
    client: reqwest::Client,
    base_url: url::Url,
    auth_token: Option<String>,
}

impl HttpCloudStore {
    pub fn new(config: &CloudConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let base_url = config.base_url.clone();

        Ok(Self {
            client: builder.build()?,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    /// Each part of the document path becomes one percent-encoded segment.
    fn url_for(&self, path: &DocumentPath) -> Result<url::Url> {
        let user = path.user().as_str();
        // `extend` skips dot segments, which would address another document
        if matches!(user, "" | "." | "..") {
            return Err(SyncError::Cloud(format!("invalid user id {:?}", user)));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Cloud(format!("base url {} cannot hold document paths", self.base_url)))?
            .pop_if_empty()
            .extend(["userData", user, path.collection().as_str(), "data"]);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl CloudStore for HttpCloudStore {
    fn get_document<'a>(&'a self, path: &'a DocumentPath) -> BoxFuture<'a, Result<Option<CloudDocument>>> {
        async move {
            let url = self.url_for(path)?;
            let res = self.authorize(self.client.get(url)).send().await?;

            let status = res.status();
            debug!("GET {} -> {}", path, status);
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(SyncError::CloudStatus { status, path: path.to_string() });
            }

            let body = res.bytes().await?;
            Ok(Some(serde_json::from_slice::<CloudDocument>(&body)?))
        }
        .boxed()
    }

    fn set_document<'a>(&'a self, path: &'a DocumentPath, doc: CloudDocument) -> BoxFuture<'a, Result<()>> {
        async move {
            let url = self.url_for(path)?;
            let res = self.authorize(self.client.put(url)).json(&doc).send().await?;

            let status = res.status();
            debug!("PUT {} -> {}", path, status);
            if !status.is_success() {
                return Err(SyncError::CloudStatus { status, path: path.to_string() });
            }
            Ok(())
        }
        .boxed()
    }
}
