//! Lock-file based hub discovery

use async_trait::async_trait;
use reqwest::Url;
use samp_core::constants::KEY_XMLRPC_URL;
use samp_core::{CoreError, HubLocator, HubParams, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Environment variable naming the hub to use
pub const SAMP_HUB_ENV: &str = "SAMP_HUB";

const STD_LOCKURL_PREFIX: &str = "std-lockurl:";
const SINGLE_INSTANCE_FILE: &str = ".samp";
const MULTIPLE_INSTANCE_DIR: &str = ".samp-1";
const LOCKURL_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a hub lock file is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockLocation {
    File(PathBuf),
    /// An `http` or `https` lock URL
    Url(Url),
}

impl fmt::Display for LockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockLocation::File(path) => write!(f, "{}", path.display()),
            LockLocation::Url(url) => write!(f, "{}", url),
        }
    }
}

/// LockfileLocator finds hubs from the lock files they publish
#[derive(Debug, Clone)]
pub struct LockfileLocator {
    home: Option<PathBuf>,
    samp_hub: Option<String>,
}

impl LockfileLocator {
    /// Create a locator for the given home directory and `SAMP_HUB` value
    pub fn new(home: Option<PathBuf>, samp_hub: Option<String>) -> Self {
        Self { home, samp_hub }
    }

    /// Create a locator from `HOME` (or `USERPROFILE`) and `SAMP_HUB`
    pub fn from_env() -> Self {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from);
        Self::new(home, std::env::var(SAMP_HUB_ENV).ok())
    }

    /// Location of the single-instance lock file
    pub fn lock_location(&self) -> Result<LockLocation> {
        if let Some(samp_hub) = &self.samp_hub {
            let location = samp_hub.strip_prefix(STD_LOCKURL_PREFIX).ok_or_else(|| {
                CoreError::InvalidConfiguration("SAMP Hub profile not supported".to_string())
            })?;
            if location.starts_with("http://") || location.starts_with("https://") {
                let url = Url::parse(location).map_err(|e| {
                    CoreError::InvalidConfiguration(format!("invalid lock URL {}: {}", location, e))
                })?;
                return Ok(LockLocation::Url(url));
            }
            let location = location.strip_prefix("file://").unwrap_or(location);
            return Ok(LockLocation::File(PathBuf::from(location)));
        }

        self.home
            .as_ref()
            .map(|home| LockLocation::File(home.join(SINGLE_INSTANCE_FILE)))
            .ok_or_else(|| {
                CoreError::InvalidConfiguration("no home directory to look for a hub in".to_string())
            })
    }

    /// Lock files of every hub advertising an XML-RPC endpoint
    ///
    /// The single-instance hub comes first, followed by multiple-instance
    /// hubs in file name order.
    pub async fn running_hubs(&self) -> Result<Vec<(LockLocation, HubParams)>> {
        let mut hubs = Vec::new();

        let single = self.lock_location()?;
        if let Some(params) = read_hub(&single).await {
            hubs.push((single, params));
        }

        if let Some(home) = &self.home {
            let mut candidates = instance_lockfiles(home.join(MULTIPLE_INSTANCE_DIR)).await;
            candidates.sort();

            for path in candidates {
                let location = LockLocation::File(path);
                if let Some(params) = read_hub(&location).await {
                    hubs.push((location, params));
                }
            }
        }

        debug!("Found {} hub lock files", hubs.len());
        Ok(hubs)
    }
}

#[async_trait]
impl HubLocator for LockfileLocator {
    async fn resolve_running_hub(&self) -> Result<HubParams> {
        let location = self.lock_location()?;
        read_hub(&location).await.ok_or_else(|| {
            CoreError::HubNotFound("Unable to find a running SAMP Hub.".to_string())
        })
    }
}

async fn instance_lockfiles(dir: PathBuf) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return found;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_str().map(is_instance_lockfile).unwrap_or(false) {
            found.push(entry.path());
        }
    }
    found
}

/// Parse a lock file, keeping it only when it names an endpoint
async fn read_hub(location: &LockLocation) -> Option<HubParams> {
    let contents = match location {
        LockLocation::File(path) => tokio::fs::read_to_string(path).await.ok()?,
        LockLocation::Url(url) => match fetch_lock(url).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!("Lock URL {} unreadable: {}", url, e);
                return None;
            }
        },
    };
    let params = HubParams::parse_lockfile(&contents);
    if params.get(KEY_XMLRPC_URL).is_some() {
        debug!("Hub lock file {}", location);
        Some(params)
    } else {
        None
    }
}

async fn fetch_lock(url: &Url) -> reqwest::Result<String> {
    let client = reqwest::Client::builder().timeout(LOCKURL_TIMEOUT).build()?;
    client
        .get(url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

/// Matches `samp-hub-<digits>-<digits>`
fn is_instance_lockfile(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("samp-hub-") else {
        return false;
    };
    let Some((first, second)) = rest.split_once('-') else {
        return false;
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    digits(first) && digits(second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const LOCKFILE: &str = "\
# SAMP Standard Profile lockfile
samp.secret=abc123
samp.hub.xmlrpc.url=http://127.0.0.1:21012/xmlrpc
samp.profile.version=1.3
";

    fn scratch_home(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("samp-discovery-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create scratch home");
        dir
    }

    /// Serve `LOCKFILE` at `/hub.lock` and 404 elsewhere
    async fn serve_lockfile() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut request = vec![0u8; 4096];
                let n = stream.read(&mut request).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&request[..n]);
                let response = if request.starts_with("GET /hub.lock ") {
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        LOCKFILE.len(),
                        LOCKFILE
                    )
                } else {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_instance_lockfile_names() {
        assert!(is_instance_lockfile("samp-hub-1234-1"));
        assert!(!is_instance_lockfile("samp-hub-1234"));
        assert!(!is_instance_lockfile("samp-hub-12a-1"));
        assert!(!is_instance_lockfile("samp-hub--1"));
        assert!(!is_instance_lockfile("other"));
    }

    #[test]
    fn test_default_lockfile_in_home() {
        let locator = LockfileLocator::new(Some(PathBuf::from("/home/astro")), None);
        assert_eq!(
            locator.lock_location().expect("location"),
            LockLocation::File(PathBuf::from("/home/astro/.samp"))
        );
    }

    #[test]
    fn test_std_lockurl_override() {
        let locator = LockfileLocator::new(None, Some("std-lockurl:file:///tmp/hub.lock".to_string()));
        assert_eq!(
            locator.lock_location().expect("location"),
            LockLocation::File(PathBuf::from("/tmp/hub.lock"))
        );

        let plain = LockfileLocator::new(None, Some("std-lockurl:/tmp/other.lock".to_string()));
        assert_eq!(
            plain.lock_location().expect("location"),
            LockLocation::File(PathBuf::from("/tmp/other.lock"))
        );

        let remote = LockfileLocator::new(
            None,
            Some("std-lockurl:https://hubs.example.org/samp/lock".to_string()),
        );
        match remote.lock_location().expect("location") {
            LockLocation::Url(url) => {
                assert_eq!(url.as_str(), "https://hubs.example.org/samp/lock")
            }
            other => panic!("expected a lock URL, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_profile() {
        let locator = LockfileLocator::new(None, Some("web-hub:http://x".to_string()));
        match locator.resolve_running_hub().await {
            Err(CoreError::InvalidConfiguration(message)) => {
                assert_eq!(message, "SAMP Hub profile not supported")
            }
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_from_lockfile() {
        let home = scratch_home("resolve");
        let locator = LockfileLocator::new(Some(home.clone()), None);
        assert!(matches!(
            locator.resolve_running_hub().await,
            Err(CoreError::HubNotFound(_))
        ));

        std::fs::write(home.join(".samp"), LOCKFILE).expect("write lockfile");
        let params = locator.resolve_running_hub().await.expect("hub");
        assert_eq!(params.secret(), Some("abc123"));

        std::fs::remove_dir_all(&home).expect("cleanup");
    }

    #[tokio::test]
    async fn test_resolve_from_http_lock_url() {
        let base = serve_lockfile().await;

        let locator = LockfileLocator::new(None, Some(format!("std-lockurl:{}/hub.lock", base)));
        let params = locator.resolve_running_hub().await.expect("hub");
        assert_eq!(params.secret(), Some("abc123"));
        assert_eq!(
            params.get(KEY_XMLRPC_URL),
            Some("http://127.0.0.1:21012/xmlrpc")
        );

        let missing = LockfileLocator::new(None, Some(format!("std-lockurl:{}/gone.lock", base)));
        assert!(matches!(
            missing.resolve_running_hub().await,
            Err(CoreError::HubNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lockfile_without_url_is_ignored() {
        let home = scratch_home("nourl");
        std::fs::write(home.join(".samp"), "samp.secret=x\n").expect("write lockfile");
        let locator = LockfileLocator::new(Some(home.clone()), None);
        assert!(matches!(
            locator.resolve_running_hub().await,
            Err(CoreError::HubNotFound(_))
        ));
        std::fs::remove_dir_all(&home).expect("cleanup");
    }

    #[tokio::test]
    async fn test_running_hubs_lists_instances() {
        let home = scratch_home("multi");
        std::fs::write(home.join(".samp"), LOCKFILE).expect("write lockfile");
        let instances = home.join(".samp-1");
        std::fs::create_dir_all(&instances).expect("create instance dir");
        std::fs::write(instances.join("samp-hub-200-2"), LOCKFILE).expect("write");
        std::fs::write(instances.join("samp-hub-100-1"), LOCKFILE).expect("write");
        std::fs::write(instances.join("notes.txt"), LOCKFILE).expect("write");

        let locator = LockfileLocator::new(Some(home.clone()), None);
        let hubs = locator.running_hubs().await.expect("hubs");
        let names: Vec<String> = hubs
            .iter()
            .map(|(location, _)| match location {
                LockLocation::File(path) => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("")
                    .to_string(),
                LockLocation::Url(url) => url.to_string(),
            })
            .collect();
        assert_eq!(names, vec![".samp", "samp-hub-100-1", "samp-hub-200-2"]);

        std::fs::remove_dir_all(&home).expect("cleanup");
    }
}
