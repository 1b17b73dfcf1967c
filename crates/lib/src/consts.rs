//! Crate-wide constants.

/// Application name, used for the cache root under the home directory.
pub const APP_NAME: &str = "ark";

/// Directory under `<home>/ark` holding locally cached artifacts.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// State marker written into every populated cache directory.
pub const ARTIFACT_STATE_FILE: &str = "artifact.json";

/// Number of hex characters in a short hash.
pub const SHORT_HASH_LEN: usize = 7;

/// Workspace settings directory, relative to the workspace root.
pub const WORKSPACE_DIR: &str = ".ark";

/// Workspace settings file name inside [`WORKSPACE_DIR`].
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable overriding the home directory used for caches.
pub const HOME_ENV: &str = "ARK_HOME";

/// Directory under [`WORKSPACE_DIR`] holding encrypted key/value files.
pub const KV_DIR: &str = "kv";

/// Comma-separated Kubernetes contexts considered safe in addition to the
/// built-in ones.
pub const SAFE_CONTEXTS_ENV: &str = "ARK_K8S_SAFE_CONTEXTS";
