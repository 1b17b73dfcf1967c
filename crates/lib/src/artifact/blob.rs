//! Remote blob stores backing the shared artifact cache.
//!
//! A store is addressed by a base URL taken from workspace configuration.
//! `file://<dir>` keeps blobs in a local or mounted directory, and
//! `http(s)://<base>` speaks plain `HEAD`/`GET`/`PUT` against an object
//! store endpoint.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum BlobError {
  #[error("invalid remote cache url {url:?}: {message}")]
  InvalidUrl { url: String, message: String },

  #[error("unsupported remote cache scheme {0:?}")]
  UnsupportedScheme(String),

  #[error("blob {key} not found")]
  NotFound { key: String },

  #[error("blob {op} {key} failed: {message}")]
  Request { op: &'static str, key: String, message: String },

  #[error("blob {op} {key} failed: {source}")]
  Io {
    op: &'static str,
    key: String,
    #[source]
    source: std::io::Error,
  },
}

/// Minimal contract the artifact cache needs from a remote store.
#[async_trait]
pub trait BlobStore: Send + Sync {
  async fn exists(&self, key: &str) -> Result<bool, BlobError>;

  async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;

  async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;
}

/// Open the store named by `base_url`.
pub fn open(base_url: &str) -> Result<Box<dyn BlobStore>, BlobError> {
  let url = Url::parse(base_url).map_err(|e| BlobError::InvalidUrl {
    url: base_url.to_string(),
    message: e.to_string(),
  })?;

  match url.scheme() {
    "file" => {
      let dir = url.to_file_path().map_err(|_| BlobError::InvalidUrl {
        url: base_url.to_string(),
        message: "not a local path".to_string(),
      })?;
      Ok(Box::new(FileBlobStore::new(dir)))
    }
    "http" | "https" => Ok(Box::new(HttpBlobStore::new(url))),
    other => Err(BlobError::UnsupportedScheme(other.to_string())),
  }
}

/// Blobs stored as plain files under a directory.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
  dir: PathBuf,
}

impl FileBlobStore {
  pub fn new(dir: PathBuf) -> Self {
    Self { dir }
  }
}

#[async_trait]
impl BlobStore for FileBlobStore {
  async fn exists(&self, key: &str) -> Result<bool, BlobError> {
    tokio::fs::try_exists(self.dir.join(key))
      .await
      .map_err(|source| BlobError::Io {
        op: "exists",
        key: key.to_string(),
        source,
      })
  }

  async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
    match tokio::fs::read(self.dir.join(key)).await {
      Ok(bytes) => Ok(bytes),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound { key: key.to_string() }),
      Err(source) => Err(BlobError::Io {
        op: "get",
        key: key.to_string(),
        source,
      }),
    }
  }

  async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
    let io_err = |source| BlobError::Io {
      op: "put",
      key: key.to_string(),
      source,
    };
    tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
    let temp_path = self.dir.join(format!("{key}.tmp"));
    tokio::fs::write(&temp_path, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&temp_path, self.dir.join(key)).await.map_err(io_err)?;
    Ok(())
  }
}

/// Blobs behind an HTTP object endpoint.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
  client: reqwest::Client,
  base: Url,
}

impl HttpBlobStore {
  pub fn new(mut base: Url) -> Self {
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    Self {
      client: reqwest::Client::new(),
      base,
    }
  }

  fn url(&self, op: &'static str, key: &str) -> Result<Url, BlobError> {
    self.base.join(key).map_err(|e| BlobError::Request {
      op,
      key: key.to_string(),
      message: e.to_string(),
    })
  }
}

fn request_err<'a>(op: &'static str, key: &'a str) -> impl Fn(reqwest::Error) -> BlobError + 'a {
  move |e| BlobError::Request {
    op,
    key: key.to_string(),
    message: e.to_string(),
  }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
  async fn exists(&self, key: &str) -> Result<bool, BlobError> {
    let url = self.url("exists", key)?;
    let response = self.client.head(url).send().await.map_err(request_err("exists", key))?;
    debug!(key, status = %response.status(), "remote cache probe");
    match response.status() {
      s if s.is_success() => Ok(true),
      StatusCode::NOT_FOUND => Ok(false),
      s => Err(BlobError::Request {
        op: "exists",
        key: key.to_string(),
        message: format!("HTTP {s}"),
      }),
    }
  }

  async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
    let url = self.url("get", key)?;
    let response = self.client.get(url).send().await.map_err(request_err("get", key))?;
    match response.status() {
      s if s.is_success() => {
        let bytes = response.bytes().await.map_err(request_err("get", key))?;
        Ok(bytes.to_vec())
      }
      StatusCode::NOT_FOUND => Err(BlobError::NotFound { key: key.to_string() }),
      s => Err(BlobError::Request {
        op: "get",
        key: key.to_string(),
        message: format!("HTTP {s}"),
      }),
    }
  }

  async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
    let url = self.url("put", key)?;
    let response = self
      .client
      .put(url)
      .header(reqwest::header::CONTENT_TYPE, "application/gzip")
      .body(bytes)
      .send()
      .await
      .map_err(request_err("put", key))?;
    if !response.status().is_success() {
      return Err(BlobError::Request {
        op: "put",
        key: key.to_string(),
        message: format!("HTTP {}", response.status()),
      });
    }
    Ok(())
  }
}
