//! `probe`: wait for an address to answer.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};
use url::Url;

use super::{ActionContext, ActionError, required};
use crate::target::TargetError;

pub const TYPE: &str = "probe";

const DEFAULT_TIMEOUT: &str = "5s";
const DEFAULT_DELAY: &str = "1s";
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_EXPECTED_STATUS: u16 = 200;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
  #[serde(default)]
  pub address: String,
  /// Per-attempt timeout, e.g. `5s`.
  #[serde(default)]
  pub timeout: String,
  /// Pause between attempts, e.g. `1s`.
  #[serde(default)]
  pub delay: String,
  #[serde(default)]
  pub max_retries: u32,
  #[serde(default)]
  pub expected_status: u16,
}

fn duration(field: &str, value: &str, default: &str) -> Result<Duration, TargetError> {
  let value = if value.is_empty() { default } else { value };
  humantime::parse_duration(value).map_err(|e| TargetError::validation(field, e.to_string()))
}

impl Probe {
  pub fn validate(&self) -> Result<(), TargetError> {
    required("address", &self.address)?;
    Url::parse(&self.address).map_err(|e| TargetError::validation("address", e.to_string()))?;
    self.timeout()?;
    self.delay()?;
    Ok(())
  }

  pub fn timeout(&self) -> Result<Duration, TargetError> {
    duration("timeout", &self.timeout, DEFAULT_TIMEOUT)
  }

  pub fn delay(&self) -> Result<Duration, TargetError> {
    duration("delay", &self.delay, DEFAULT_DELAY)
  }

  pub fn max_retries(&self) -> u32 {
    if self.max_retries == 0 { DEFAULT_MAX_RETRIES } else { self.max_retries }
  }

  pub fn expected_status(&self) -> u16 {
    if self.expected_status == 0 {
      DEFAULT_EXPECTED_STATUS
    } else {
      self.expected_status
    }
  }

  pub async fn execute(&self, ctx: &ActionContext) -> Result<(), ActionError> {
    tokio::select! {
      biased;
      _ = ctx.cancel.cancelled() => Err(ActionError::Cancelled),
      res = self.check() => res,
    }
  }

  /// Dial the address until it answers or the attempts run out.
  async fn check(&self) -> Result<(), ActionError> {
    let failed = |message: String| ActionError::Probe {
      address: self.address.clone(),
      message,
    };
    let address = Url::parse(&self.address).map_err(|e| failed(e.to_string()))?;
    let timeout = self.timeout().map_err(|e| failed(e.to_string()))?;
    let delay = self.delay().map_err(|e| failed(e.to_string()))?;
    let expected = self.expected_status();

    let on_error = |err: &ActionError, remaining: u32| {
      warn!(address = %self.address, error = %err, remaining, "probe attempt failed");
    };

    match address.scheme() {
      s if s.starts_with("http") => {
        let client = reqwest::Client::builder()
          .timeout(timeout)
          .build()
          .map_err(|e| failed(e.to_string()))?;
        let (client, address, failed) = (&client, &address, &failed);
        retry(
          self.max_retries(),
          delay,
          || async move {
            let response = client
              .get(address.clone())
              .send()
              .await
              .map_err(|e| failed(e.to_string()))?;
            if response.status().as_u16() == expected {
              Ok(())
            } else {
              Err(failed(format!("expected status {expected}, got {}", response.status().as_u16())))
            }
          },
          on_error,
        )
        .await
      }
      s if s.starts_with("tcp") || s.starts_with("udp") => {
        let host = address.host_str().ok_or_else(|| failed("missing host".to_string()))?;
        let port = address.port().ok_or_else(|| failed("missing port".to_string()))?;
        let target = format!("{host}:{port}");
        let udp = s.starts_with("udp");
        let (target, failed) = (&target, &failed);
        retry(
          self.max_retries(),
          delay,
          || async move { dial(target, udp, timeout).await.map_err(|e| failed(e.to_string())) },
          on_error,
        )
        .await
      }
      other => Err(failed(format!("no supported probe for scheme {other}"))),
    }
  }
}

async fn dial(target: &str, udp: bool, timeout: Duration) -> std::io::Result<()> {
  let attempt = async {
    if udp {
      let socket = UdpSocket::bind("0.0.0.0:0").await?;
      socket.connect(target).await
    } else {
      TcpStream::connect(target).await.map(drop)
    }
  };
  tokio::time::timeout(timeout, attempt)
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, format!("dial {target} timed out")))?
}

/// Call `attempt` up to `attempts` times, sleeping `delay` between failures.
///
/// `on_error` sees each failure with the number of attempts left.
pub(crate) async fn retry<F, Fut, E>(
  attempts: u32,
  delay: Duration,
  mut attempt: F,
  mut on_error: impl FnMut(&E, u32),
) -> Result<(), E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<(), E>>,
{
  let mut remaining = attempts.max(1);
  loop {
    remaining -= 1;
    match attempt().await {
      Ok(()) => return Ok(()),
      Err(e) => {
        on_error(&e, remaining);
        if remaining == 0 {
          return Err(e);
        }
        debug!(delay = ?delay, remaining, "retrying");
        tokio::time::sleep(delay).await;
      }
    }
  }
}
