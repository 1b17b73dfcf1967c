//! External backend: subscribe to a running watchman daemon.
//!
//! Speaks the JSON protocol over the daemon's unix socket: one JSON array
//! per command line, one JSON object per response line. The daemon reports
//! content hashes as SHA-1, matching [`FileRecord::hash`].

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use super::ObserverError;
use super::file::{FileRecord, FileType};

pub const SOCKET_ENV: &str = "WATCHMAN_SOCK";

const FIELDS: [&str; 6] = ["name", "exists", "new", "type", "symlink_target", "content.sha1hex"];

fn protocol(message: impl Into<String>) -> ObserverError {
  ObserverError::Watchman(message.into())
}

/// The daemon socket: `$WATCHMAN_SOCK`, else whatever `watchman
/// get-sockname` reports.
pub async fn socket_path() -> Result<PathBuf, ObserverError> {
  if let Ok(sock) = std::env::var(SOCKET_ENV)
    && !sock.is_empty()
  {
    return Ok(PathBuf::from(sock));
  }
  let output = tokio::process::Command::new("watchman")
    .arg("get-sockname")
    .output()
    .await
    .map_err(|e| protocol(format!("failed to run watchman get-sockname: {e}")))?;
  if !output.status.success() {
    return Err(protocol(String::from_utf8_lossy(&output.stderr).trim().to_string()));
  }
  let resp: Value = serde_json::from_slice(&output.stdout).map_err(|e| protocol(e.to_string()))?;
  resp
    .get("sockname")
    .and_then(Value::as_str)
    .map(PathBuf::from)
    .ok_or_else(|| protocol("get-sockname returned no sockname"))
}

/// Subscription expression: every file, minus the `ignore` globs.
pub fn expression(ignore: &[String]) -> Value {
  let mut terms = vec![json!("allof"), json!(["match", "*", "basename", {"includedotfiles": true}])];
  for pattern in ignore {
    terms.push(json!(["not", ["match", pattern, "wholename", {"includedotfiles": true}]]));
  }
  Value::Array(terms)
}

#[derive(Debug, Deserialize)]
struct WatchProject {
  watch: String,
  #[serde(default)]
  relative_path: String,
}

#[derive(Debug, Deserialize)]
struct DaemonFile {
  name: String,
  #[serde(default)]
  exists: bool,
  #[serde(default)]
  new: bool,
  #[serde(default, rename = "type")]
  kind: String,
  #[serde(default)]
  symlink_target: String,
  /// A hex string for regular files, an error object for everything else.
  #[serde(default, rename = "content.sha1hex")]
  sha1: Value,
}

impl DaemonFile {
  fn into_record(self, root: &Path) -> FileRecord {
    FileRecord {
      name: root.join(&self.name).to_string_lossy().into_owned(),
      kind: match self.kind.as_str() {
        "d" => FileType::Dir,
        "l" => FileType::Symlink,
        _ => FileType::File,
      },
      hash: self.sha1.as_str().unwrap_or_default().to_string(),
      rel_name: self.name,
      exists: self.exists,
      new: self.new,
      symlink_target: self.symlink_target,
    }
  }
}

pub struct Client {
  reader: BufReader<OwnedReadHalf>,
  writer: OwnedWriteHalf,
}

impl Client {
  pub async fn connect(socket: &Path) -> Result<Self, ObserverError> {
    let stream = UnixStream::connect(socket)
      .await
      .map_err(ObserverError::io(socket))?;
    let (read, write) = stream.into_split();
    Ok(Self {
      reader: BufReader::new(read),
      writer: write,
    })
  }

  pub async fn send(&mut self, command: &Value) -> Result<(), ObserverError> {
    let mut line = serde_json::to_vec(command).map_err(|e| protocol(e.to_string()))?;
    line.push(b'\n');
    self
      .writer
      .write_all(&line)
      .await
      .map_err(|e| protocol(format!("failed to send command: {e}")))
  }

  /// The next response; `None` once the daemon hangs up.
  pub async fn receive(&mut self) -> Result<Option<Map<String, Value>>, ObserverError> {
    let mut line = String::new();
    let read = self
      .reader
      .read_line(&mut line)
      .await
      .map_err(|e| protocol(format!("failed to read response: {e}")))?;
    if read == 0 {
      return Ok(None);
    }
    let resp: Map<String, Value> = serde_json::from_str(&line).map_err(|e| protocol(e.to_string()))?;
    if let Some(err) = resp.get("error") {
      return Err(protocol(err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string())));
    }
    Ok(Some(resp))
  }

  async fn exec(&mut self, command: &Value) -> Result<Map<String, Value>, ObserverError> {
    self.send(command).await?;
    self
      .receive()
      .await?
      .ok_or_else(|| protocol("the watchman server was shut down"))
  }

  /// Watch the project containing `dir`; returns the directory file names
  /// are reported relative to.
  pub async fn watch_project(&mut self, dir: &Path) -> Result<PathBuf, ObserverError> {
    let resp = self.exec(&json!(["watch-project", dir.to_string_lossy()])).await?;
    let resp: WatchProject = serde_json::from_value(Value::Object(resp)).map_err(|e| protocol(e.to_string()))?;
    let watch = PathBuf::from(resp.watch);
    Ok(if resp.relative_path.is_empty() {
      watch
    } else {
      watch.join(resp.relative_path)
    })
  }

  pub async fn subscribe(&mut self, root: &Path, name: &str, ignore: &[String]) -> Result<(), ObserverError> {
    self
      .send(&json!([
        "subscribe",
        root.to_string_lossy(),
        name,
        {"fields": FIELDS, "expression": expression(ignore), "defer_vcs": true}
      ]))
      .await
  }
}

/// Subscribe under `root` and forward every change batch until `cancel`
/// fires or the daemon goes away.
pub(super) async fn produce(
  socket: PathBuf,
  root: PathBuf,
  ignore: Vec<String>,
  tx: mpsc::Sender<Result<Vec<FileRecord>, ObserverError>>,
  cancel: CancellationToken,
) {
  let mut client = match Client::connect(&socket).await {
    Ok(c) => c,
    Err(e) => {
      let _ = tx.send(Err(e)).await;
      return;
    }
  };
  let root = match client.watch_project(&root).await {
    Ok(r) => r,
    Err(e) => {
      let _ = tx.send(Err(e)).await;
      return;
    }
  };
  let name = Uuid::new_v4().to_string();
  if let Err(e) = client.subscribe(&root, &name, &ignore).await {
    let _ = tx.send(Err(e)).await;
    return;
  }
  debug!(root = %root.display(), subscription = %name, "subscribed to watchman");

  loop {
    let resp = tokio::select! {
      _ = cancel.cancelled() => return,
      resp = client.receive() => resp,
    };
    let resp = match resp {
      Ok(Some(resp)) => resp,
      Ok(None) => {
        let _ = tx.send(Err(protocol("the watchman server was shut down"))).await;
        return;
      }
      Err(e) => {
        if tx.send(Err(e)).await.is_err() {
          return;
        }
        continue;
      }
    };
    if resp.contains_key("subscribe") {
      trace!("subscription acknowledged");
      continue;
    }
    let Some(files) = resp.get("files") else {
      continue;
    };
    let files: Vec<DaemonFile> = match serde_json::from_value(files.clone()) {
      Ok(files) => files,
      Err(e) => {
        if tx.send(Err(protocol(e.to_string()))).await.is_err() {
          return;
        }
        continue;
      }
    };
    let records: Vec<FileRecord> = files.into_iter().map(|f| f.into_record(&root)).collect();
    if tx.send(Ok(records)).await.is_err() {
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;
  use tokio::net::UnixListener;

  #[test]
  fn ignore_globs_become_negated_matches() {
    assert_eq!(
      expression(&["node_modules/**".into()]),
      json!([
        "allof",
        ["match", "*", "basename", {"includedotfiles": true}],
        ["not", ["match", "node_modules/**", "wholename", {"includedotfiles": true}]]
      ])
    );
  }

  /// A daemon that answers watch-project and subscribe, then pushes one
  /// change feed.
  async fn fake_daemon(listener: UnixListener, root: String) -> Vec<Value> {
    let (stream, _) = listener.accept().await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut commands = Vec::new();

    let cmd: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    commands.push(cmd);
    write
      .write_all(format!("{}\n", json!({"version": "4.9", "watch": root})).as_bytes())
      .await
      .unwrap();

    let cmd: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    commands.push(cmd);
    let feed = json!({
      "unilateral": true,
      "files": [
        {"name": "src/a.txt", "exists": true, "new": true, "type": "f",
         "content.sha1hex": "da39a3ee5e6b4b0d3255bfef95601890afd80709"},
        {"name": "src", "exists": true, "type": "d", "content.sha1hex": {"error": "not a file"}},
        {"name": "old.txt", "exists": false, "type": "f"}
      ]
    });
    write
      .write_all(format!("{}\n{}\n", json!({"subscribe": "x"}), feed).as_bytes())
      .await
      .unwrap();
    commands
  }

  #[tokio::test]
  async fn subscription_feeds_become_records() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let daemon = tokio::spawn(fake_daemon(listener, "/ws".into()));

    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let producer = tokio::spawn(produce(
      socket,
      PathBuf::from("/ws"),
      vec!["build/**".into()],
      tx,
      cancel.clone(),
    ));

    let records = rx.recv().await.unwrap().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].name, "/ws/src/a.txt");
    assert_eq!(records[0].hash, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    assert!(records[0].new);
    assert!(records[1].is_dir() && records[1].hash.is_empty());
    assert!(!records[2].exists);

    let commands = daemon.await.unwrap();
    assert_eq!(commands[0], json!(["watch-project", "/ws"]));
    assert_eq!(commands[1][0], "subscribe");
    assert_eq!(commands[1][1], "/ws");
    assert_eq!(commands[1][3]["defer_vcs"], true);
    assert_eq!(commands[1][3]["expression"], expression(&["build/**".into()]));

    cancel.cancel();
    producer.await.unwrap();
  }

  #[tokio::test]
  async fn error_responses_surface() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("sock");
    let listener = UnixListener::bind(&socket).unwrap();
    tokio::spawn(async move {
      let (mut stream, _) = listener.accept().await.unwrap();
      stream
        .write_all(b"{\"error\": \"unable to resolve root /nope\"}\n")
        .await
        .unwrap();
      // keep the connection open until the client reads
      tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    });

    let mut client = Client::connect(&socket).await.unwrap();
    let err = client.watch_project(Path::new("/nope")).await.unwrap_err();
    assert!(matches!(err, ObserverError::Watchman(msg) if msg == "unable to resolve root /nope"));
  }
}
