//! Server configuration

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Startup configuration for the Pandoc Server.
///
/// Built once from the command line and shared read-only with every request.
#[derive(Clone)]
pub struct ServerConfig {
    /// Host to listen on (default: all interfaces)
    pub host: String,
    /// Port to listen on (default: 8080)
    pub port: u16,
    /// Bearer token required in `Authorization`; `None` disables auth
    pub token: Option<String>,
    /// Conversion tool executable (default: `pandoc`)
    pub program: PathBuf,
    /// Directory under which per-request sandboxes are created
    /// (default: the system temp directory)
    pub work_dir: Option<PathBuf>,
    /// Timeout for each remote file download (default: 60s)
    pub fetch_timeout: Duration,
    /// Timeout for the conversion tool; `None` lets it run to completion
    pub conversion_timeout: Option<Duration>,
    /// Maximum request body size in bytes (default: 256MB)
    pub max_body_bytes: usize,
    /// Maximum download size in bytes for URL sources (default: 100MB)
    pub max_download_bytes: u64,
    /// Allow URLs that resolve to private/reserved IPs (default: true)
    pub allow_private_urls: bool,
}

impl ServerConfig {
    /// Value the `Authorization` header must carry, if auth is enabled.
    pub fn expected_authorization(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {}", token))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            token: None,
            program: PathBuf::from("pandoc"),
            work_dir: None,
            fetch_timeout: Duration::from_secs(60),
            conversion_timeout: None,
            max_body_bytes: 256 * 1024 * 1024,     // 256MB
            max_download_bytes: 100 * 1024 * 1024, // 100MB
            allow_private_urls: true,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("program", &self.program)
            .field("work_dir", &self.work_dir)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("conversion_timeout", &self.conversion_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_download_bytes", &self.max_download_bytes)
            .field("allow_private_urls", &self.allow_private_urls)
            .finish()
    }
}
