//! Shared constants.

pub const APP_NAME: &str = "solvekit";

/// Address of the remote build service.
pub const ENV_BUILDKIT_HOST: &str = "BUILDKIT_HOST";
/// Cache backend endpoint handed to `gha` cache descriptors.
pub const ENV_CACHE_URL: &str = "ACTIONS_CACHE_URL";
/// Cache backend credential handed to `gha` cache descriptors.
pub const ENV_CACHE_TOKEN: &str = "ACTIONS_RUNTIME_TOKEN";
/// Overrides the directory holding the Docker CLI `config.json`.
pub const ENV_DOCKER_CONFIG: &str = "DOCKER_CONFIG";

/// Local directory build output is exported to.
pub const DEFAULT_OUTPUT_DIR: &str = "result";
/// Cache scope shared by cache import and export.
pub const DEFAULT_CACHE_SCOPE: &str = "test-cache";

pub const DEFAULT_IMAGE: &str = "docker.io/library/alpine:latest";
pub const CALLBACK_IMAGE: &str = "alpine";
pub const CALLBACK_USER: &str = "root";
pub const DEFAULT_COMMAND: &str = r#"sh -c "sleep 10 && echo -n test > /test""#;

/// Length of the digest prefix used in image tags.
pub const DIGEST_TAG_LEN: usize = 12;

/// Repository intermediate exec results are committed to.
pub const BUILD_REPO: &str = "solvekit/build";
/// Repository prefix cache namespaces are tagged under.
pub const CACHE_REPO_PREFIX: &str = "solvekit-cache";

/// Capacity of the status channel between executor and drain.
pub const STATUS_CHANNEL_CAPACITY: usize = 32;

/// Request timeout, in seconds, for engine connections.
pub const ENGINE_TIMEOUT_SECS: u64 = 120;

/// PATH given to exec ops when the image config is not consulted.
pub const DEFAULT_PATH_ENV: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
