//! WebDAV implementation of the remote backup store.
//!
//! Plain GET/PUT against one remote directory with basic auth; MKCOL is
//! only used to create the backup directory. No PROPFIND, no locking.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use tracing::debug;

use imgfan_core::domain::WebDavProfile;
use imgfan_core::ports::{RemoteStore, RemoteStoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// File-level WebDAV client bound to one profile's backup directory.
pub struct WebDavStore {
    client: reqwest::Client,
    /// Directory URL, always with a trailing slash.
    base_url: String,
    username: String,
    password: String,
}

impl WebDavStore {
    /// Build a store from a profile.
    pub fn from_profile(profile: &WebDavProfile) -> Result<Self, RemoteStoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteStoreError::unreachable(format!("cannot build client: {e}")))?;

        let mut base_url = profile.url.trim_end_matches('/').to_string();
        let path = profile.remote_path.trim_matches('/');
        if !path.is_empty() {
            base_url.push('/');
            base_url.push_str(path);
        }
        base_url.push('/');

        Ok(Self {
            client,
            base_url,
            username: profile.username.clone(),
            password: profile.password.clone(),
        })
    }

    fn url_for(&self, file_name: &str) -> String {
        format!("{}{file_name}", self.base_url)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }
}

fn map_send_error(error: &reqwest::Error) -> RemoteStoreError {
    if error.is_timeout() {
        RemoteStoreError::Timeout {
            message: error.to_string(),
        }
    } else {
        RemoteStoreError::unreachable(error.to_string())
    }
}

fn reject(status: StatusCode, context: &str) -> RemoteStoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteStoreError::Auth {
            message: format!("{context}: HTTP {status}"),
        },
        _ => RemoteStoreError::http(status.as_u16(), context.to_string()),
    }
}

#[async_trait]
impl RemoteStore for WebDavStore {
    async fn get(&self, file_name: &str) -> Result<Option<Vec<u8>>, RemoteStoreError> {
        let url = self.url_for(file_name);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| map_send_error(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| RemoteStoreError::InvalidResponse {
                        message: format!("body read failed: {e}"),
                    })?;
                debug!(file = file_name, bytes = body.len(), "remote file fetched");
                Ok(Some(body.to_vec()))
            }
            status => Err(reject(status, &format!("GET {file_name}"))),
        }
    }

    async fn put(&self, file_name: &str, body: Vec<u8>) -> Result<(), RemoteStoreError> {
        let url = self.url_for(file_name);
        let bytes = body.len();
        let response = self
            .request(Method::PUT, &url)
            .body(body)
            .send()
            .await
            .map_err(|e| map_send_error(&e))?;

        let status = response.status();
        if status.is_success() {
            debug!(file = file_name, bytes, "remote file written");
            Ok(())
        } else {
            Err(reject(status, &format!("PUT {file_name}")))
        }
    }

    async fn ensure_root(&self) -> Result<(), RemoteStoreError> {
        let mkcol = Method::from_bytes(b"MKCOL")
            .map_err(|e| RemoteStoreError::unreachable(format!("bad method: {e}")))?;
        let response = self
            .request(mkcol, &self.base_url)
            .send()
            .await
            .map_err(|e| map_send_error(&e))?;

        match response.status() {
            // 405 means the collection already exists.
            StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(reject(status, "MKCOL backup directory")),
        }
    }
}
