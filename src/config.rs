use std::env;
use std::path::PathBuf;

/// Address the backend binds to. The backend always listens on localhost;
/// the port matches the one compiled into the backend itself.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";

/// Liveness route served by the backend.
pub const STATUS_PATH: &str = "/api/status";

// Overriding the origin only moves supervision and polling; the remote IPC
// capability and frontendDist pin page command access to the default origin.
const BACKEND_URL_ENV: &str = "TOOLS_BACKEND_URL";
const BACKEND_DIR_ENV: &str = "TOOLS_BACKEND_DIR";
const DEVTOOLS_ENV: &str = "TOOLS_DESKTOP_DEVTOOLS";

const BACKEND_EXECUTABLE: &str = "engineering-tools-backend";

/// Where the backend lives and how to reach it. Built once at startup;
/// everything downstream borrows from this.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Origin of the backend, no trailing slash.
    pub base_url: String,
    /// Directory the backend runs in, also where its executable sits.
    pub working_dir: PathBuf,
    /// Full path to the backend executable.
    pub executable: PathBuf,
}

impl BackendConfig {
    /// Resolve the configuration from compiled defaults plus environment
    /// overrides. The backend directory defaults to `backend/` next to the
    /// host executable.
    pub fn from_env() -> Self {
        let base_url = env::var(BACKEND_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

        let working_dir = env::var(BACKEND_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_backend_dir);

        Self::new(&base_url, working_dir)
    }

    pub fn new(base_url: &str, working_dir: PathBuf) -> Self {
        let executable = working_dir.join(backend_executable_name());
        Self {
            base_url: normalize_base_url(base_url),
            working_dir,
            executable,
        }
    }

    pub fn root_url(&self) -> String {
        format!("{}/", self.base_url)
    }

    pub fn status_url(&self) -> String {
        format!("{}{}", self.base_url, STATUS_PATH)
    }
}

/// Whether the inspector should be opened on startup (debug builds only).
pub fn devtools_enabled() -> bool {
    match env::var(DEVTOOLS_ENV) {
        Ok(value) => {
            let value = value.trim();
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        }
        Err(_) => false,
    }
}

/// Platform-conditional executable name: Windows binaries carry the `.exe`
/// suffix, everything else uses the bare name.
pub fn backend_executable_name() -> String {
    if cfg!(windows) {
        format!("{}.exe", BACKEND_EXECUTABLE)
    } else {
        BACKEND_EXECUTABLE.to_string()
    }
}

/// Default backend directory: `backend/` beside the host executable, so the
/// bundled layout works without any configuration.
fn default_backend_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("backend")))
        .unwrap_or_else(|| PathBuf::from("backend"))
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let config = BackendConfig::new("http://127.0.0.1:5000/", PathBuf::from("/tmp"));
        assert_eq!(config.base_url, "http://127.0.0.1:5000");
        assert_eq!(config.root_url(), "http://127.0.0.1:5000/");
        assert_eq!(config.status_url(), "http://127.0.0.1:5000/api/status");
    }

    #[test]
    fn executable_sits_in_working_dir() {
        let config = BackendConfig::new(DEFAULT_BACKEND_URL, PathBuf::from("/opt/tools/backend"));
        assert_eq!(
            config.executable,
            PathBuf::from("/opt/tools/backend").join(backend_executable_name())
        );
    }

    #[test]
    fn executable_name_matches_platform() {
        let name = backend_executable_name();
        if cfg!(windows) {
            assert!(name.ends_with(".exe"));
        } else {
            assert_eq!(name, "engineering-tools-backend");
        }
    }
}
