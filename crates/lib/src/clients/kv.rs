//! Encrypted key/value storage and the secret engine it syncs into.
//!
//! [`VaultStorage`] keeps each secret as a Vault transit ciphertext on disk
//! under an encrypted data directory; reading one asks Vault to decrypt it.
//! [`VaultEngine`] is the KV secret engine the `sync_kv` target writes to.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tempfile::NamedTempFile;
use tracing::debug;

use super::ClientError;

#[async_trait]
pub trait KvStorage: Send + Sync {
  /// Directory holding the encrypted files.
  fn encrypted_data_path(&self) -> &Path;

  /// Decrypt the secret stored at `path`, relative to the encrypted data path.
  async fn get(&self, path: &str) -> Result<Map<String, Value>, ClientError>;

  /// Decrypt a secret into a private temporary JSON file, removed on drop.
  async fn decrypt_to_file(&self, path: &str) -> Result<NamedTempFile, ClientError> {
    let data = self.get(path).await?;
    let bytes = serde_json::to_vec(&data).map_err(|e| ClientError::Decode {
      service: "kv",
      message: e.to_string(),
    })?;
    let io_err = |source| ClientError::Io {
      op: "write",
      path: path.to_string(),
      source,
    };
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().map_err(io_err)?;
    file.write_all(&bytes).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(file)
  }
}

#[async_trait]
pub trait SecretEngine: Send + Sync {
  /// True if the engine is initialized and unsealed.
  async fn healthy(&self) -> Result<bool, ClientError>;

  async fn write(&self, path: &str, body: Value) -> Result<(), ClientError>;
}

/// Minimal Vault HTTP client shared by storage and engine.
#[derive(Debug, Clone)]
struct VaultHttp {
  client: reqwest::Client,
  address: String,
  token: String,
}

impl VaultHttp {
  fn new(address: &str, token: &str) -> Self {
    Self {
      client: reqwest::Client::new(),
      address: address.trim_end_matches('/').to_string(),
      token: token.to_string(),
    }
  }

  fn url(&self, path: &str) -> String {
    format!("{}/v1/{}", self.address, path.trim_start_matches('/'))
  }

  fn http_err(&self, url: &str) -> impl Fn(reqwest::Error) -> ClientError + '_ {
    let url = url.to_string();
    move |e| ClientError::Http {
      service: "vault",
      url: url.clone(),
      message: e.to_string(),
    }
  }

  async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, ClientError> {
    let url = self.url(path);
    let response = self
      .client
      .post(&url)
      .header("X-Vault-Token", &self.token)
      .json(body)
      .send()
      .await
      .map_err(self.http_err(&url))?;
    if !response.status().is_success() {
      return Err(ClientError::Http {
        service: "vault",
        url,
        message: format!("HTTP {}", response.status()),
      });
    }
    Ok(response)
  }
}

#[derive(Debug, Deserialize)]
struct DecryptResponse {
  data: DecryptData,
}

#[derive(Debug, Deserialize)]
struct DecryptData {
  plaintext: String,
}

/// Secrets encrypted with a Vault transit key, stored as files.
#[derive(Debug, Clone)]
pub struct VaultStorage {
  http: VaultHttp,
  base_path: PathBuf,
  encryption_key: String,
}

impl VaultStorage {
  pub fn new(address: &str, token: &str, encryption_key: &str, base_path: impl Into<PathBuf>) -> Self {
    Self {
      http: VaultHttp::new(address, token),
      base_path: base_path.into(),
      encryption_key: encryption_key.to_string(),
    }
  }
}

#[async_trait]
impl KvStorage for VaultStorage {
  fn encrypted_data_path(&self) -> &Path {
    &self.base_path
  }

  async fn get(&self, path: &str) -> Result<Map<String, Value>, ClientError> {
    let file = self.base_path.join(path);
    let ciphertext = tokio::fs::read_to_string(&file).await.map_err(|source| ClientError::Io {
      op: "read",
      path: file.display().to_string(),
      source,
    })?;

    let response = self
      .http
      .post(
        &format!("transit/decrypt/{}", self.encryption_key),
        &json!({ "ciphertext": ciphertext.trim() }),
      )
      .await?;
    let decoded: DecryptResponse = response.json().await.map_err(|e| ClientError::Decode {
      service: "vault",
      message: e.to_string(),
    })?;

    let plaintext = STANDARD
      .decode(decoded.data.plaintext.as_bytes())
      .map_err(|e| ClientError::Decode {
        service: "vault",
        message: format!("plaintext is not base64: {e}"),
      })?;
    debug!(path, size = plaintext.len(), "decrypted secret");

    serde_json::from_slice(&plaintext).map_err(|e| ClientError::Decode {
      service: "vault",
      message: format!("secret {path} is not a JSON object: {e}"),
    })
  }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
  #[serde(default)]
  initialized: bool,
  #[serde(default)]
  sealed: bool,
}

/// Vault KV secret engine.
#[derive(Debug, Clone)]
pub struct VaultEngine {
  http: VaultHttp,
}

impl VaultEngine {
  pub fn new(address: &str, token: &str) -> Self {
    Self {
      http: VaultHttp::new(address, token),
    }
  }
}

#[async_trait]
impl SecretEngine for VaultEngine {
  async fn healthy(&self) -> Result<bool, ClientError> {
    let url = self.http.url("sys/health");
    // sys/health answers with non-2xx codes for sealed or standby nodes,
    // the body is still authoritative.
    let response = self.http.client.get(&url).send().await.map_err(self.http.http_err(&url))?;
    let health: HealthResponse = response.json().await.map_err(|e| ClientError::Decode {
      service: "vault",
      message: e.to_string(),
    })?;
    Ok(health.initialized && !health.sealed)
  }

  async fn write(&self, path: &str, body: Value) -> Result<(), ClientError> {
    self.http.post(path, &body).await?;
    debug!(path, "wrote secret");
    Ok(())
  }
}
