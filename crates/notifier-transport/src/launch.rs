//! Launch options the bridge uses to start its browser.

use std::path::{Path, PathBuf};

use notifier_core::TransportError;
use serde::{Deserialize, Serialize};

/// Browser launch configuration forwarded to the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchOptions {
    /// Browser executable; a bare name is looked up on `PATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,
    /// Extra browser flags (e.g. `--no-sandbox` inside containers).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl LaunchOptions {
    /// Resolve `executable_path` to an existing file.
    ///
    /// The search order is:
    /// 1. Explicit paths (absolute or containing a separator).
    /// 2. The current process PATH via `which`.
    ///
    /// # Errors
    /// Returns `TransportError::Launch` if the executable cannot be found.
    pub async fn resolve(mut self) -> Result<Self, TransportError> {
        let Some(executable) = self.executable_path.take() else {
            return Ok(self);
        };

        let resolved = resolve_executable_path(&executable).await.ok_or_else(|| {
            TransportError::Launch(format!("executable not found: {}", executable.display()))
        })?;
        tracing::debug!(executable = %resolved.display(), "Resolved browser executable");
        self.executable_path = Some(resolved);
        Ok(self)
    }
}

async fn resolve_executable_path(executable: &Path) -> Option<PathBuf> {
    if executable.as_os_str().is_empty() {
        return None;
    }

    if executable.is_absolute() || executable.components().count() > 1 {
        return executable.is_file().then(|| executable.to_path_buf());
    }

    let executable = executable.to_path_buf();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_executable_is_passthrough() {
        let opts = LaunchOptions {
            executable_path: None,
            args: vec!["--no-sandbox".to_string()],
        };
        assert_eq!(opts.clone().resolve().await.unwrap(), opts);
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let opts = LaunchOptions {
            executable_path: Some(PathBuf::from("/definitely/not/here/chromium")),
            args: Vec::new(),
        };
        assert!(matches!(
            opts.resolve().await,
            Err(TransportError::Launch(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bare_name_found_on_path() {
        let opts = LaunchOptions {
            executable_path: Some(PathBuf::from("sh")),
            args: Vec::new(),
        };
        let resolved = opts.resolve().await.unwrap();
        assert!(resolved.executable_path.unwrap().is_absolute());
    }

    #[test]
    fn test_serialization_skips_empty() {
        let json = serde_json::to_string(&LaunchOptions::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
