// HTTP Artifact Store
//
// Uploads a harvested staging directory to an object store over plain
// HTTP PUT. Each upload is verified against the returned ETag (hex SHA-256
// of the body) and retried up to the configured attempt budget; content
// corruption in flight is the failure mode this guards against.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use gatewatch_core::error::{AppError, Result};
use gatewatch_core::port::ArtifactStore;

const RUNNER_LOG: &str = "run_tests.log";

pub struct HttpArtifactStore {
    client: reqwest::Client,
    base_url: String,
    public_url: String,
    attempts: u32,
}

impl HttpArtifactStore {
    pub fn new(base_url: impl Into<String>, public_url: impl Into<String>, attempts: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            public_url: public_url.into(),
            attempts: attempts.max(1),
        }
    }

    async fn put_verified(&self, url: &str, path: &Path, content_type: &str) -> Result<()> {
        let body = tokio::fs::read(path).await?;
        let checksum = hex_sha256(&body);

        let mut last_failure = String::new();
        for attempt in 1..=self.attempts {
            let response = self
                .client
                .put(url)
                .header("Content-Type", content_type)
                .body(body.clone())
                .send()
                .await
                .map_err(|e| AppError::Upload(format!("PUT {}: {}", url, e)))?;

            if !response.status().is_success() {
                warn!(url, status = %response.status(), attempt, "upload rejected");
                last_failure = format!("status {}", response.status());
                continue;
            }

            let etag = response
                .headers()
                .get("ETag")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim_matches('"').to_string());
            match etag {
                // No ETag from the server means no verification possible.
                None => return Ok(()),
                Some(remote) if remote.eq_ignore_ascii_case(&checksum) => return Ok(()),
                Some(remote) => {
                    warn!(url, attempt, remote = %remote, local = %checksum, "checksum mismatch, re-uploading");
                    last_failure = format!("checksum mismatch (server sent {})", remote);
                }
            }
        }
        Err(AppError::Upload(format!(
            "{}: giving up after {} attempts: {}",
            url, self.attempts, last_failure
        )))
    }
}

fn hex_sha256(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("gz") => "application/gzip",
        Some("txt") | Some("log") | Some("conf") | Some("sh") | Some("pid") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// All regular files under `root`, as paths relative to it, with the
/// runner log sorted first so it uploads even if a later file fails.
fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                walk(&path, root, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort_by_key(|p| (p.file_name().map(|n| n != RUNNER_LOG).unwrap_or(true), p.clone()));
    Ok(files)
}

fn render_index(prefix: &str, files: &[PathBuf]) -> String {
    let mut page = String::from("<html><head><title>Test results</title></head><body>\n");
    page.push_str(&format!("<h1>{}</h1>\n<ul>\n", prefix));
    for file in files {
        let name = file.to_string_lossy();
        page.push_str(&format!("<li><a href=\"{0}\">{0}</a></li>\n", name));
    }
    page.push_str("</ul>\n</body></html>\n");
    page
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn upload(&self, local_dir: &Path, remote_prefix: &str) -> Result<String> {
        let prefix = remote_prefix.trim_matches('/');
        let files = collect_files(local_dir)?;
        info!(prefix, count = files.len(), "uploading artifacts");

        for file in &files {
            let url = format!("{}/{}/{}", self.base_url, prefix, file.to_string_lossy());
            debug!(url = %url, "uploading");
            self.put_verified(&url, &local_dir.join(file), content_type_for(file))
                .await?;
        }

        let index = render_index(prefix, &files);
        let index_path = local_dir.join("index.html");
        tokio::fs::write(&index_path, index).await?;
        let index_url = format!("{}/{}/index.html", self.base_url, prefix);
        self.put_verified(&index_url, &index_path, "text/html").await?;

        Ok(format!("{}/{}/index.html", self.public_url, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_log_sorts_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("aaa.txt"), "x").unwrap();
        std::fs::write(dir.path().join(RUNNER_LOG), "y").unwrap();
        std::fs::create_dir(dir.path().join("logs")).unwrap();
        std::fs::write(dir.path().join("logs/syslog.gz"), "z").unwrap();

        let files = collect_files(dir.path()).unwrap();
        assert_eq!(files[0], PathBuf::from(RUNNER_LOG));
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn content_types_cover_the_harvested_extensions() {
        assert_eq!(content_type_for(Path::new("run_tests.log")), "text/plain");
        assert_eq!(content_type_for(Path::new("logs/syslog.gz")), "application/gzip");
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("core.dump")), "application/octet-stream");
    }

    #[test]
    fn index_links_every_file() {
        let files = vec![PathBuf::from(RUNNER_LOG), PathBuf::from("logs/syslog.gz")];
        let page = render_index("61/65261/7", &files);
        assert!(page.contains("href=\"run_tests.log\""));
        assert!(page.contains("href=\"logs/syslog.gz\""));
    }

    #[test]
    fn checksums_are_lowercase_hex() {
        let sum = hex_sha256(b"");
        assert_eq!(sum.len(), 64);
        assert!(sum.starts_with("e3b0c44298fc1c14"));
    }

    #[tokio::test]
    async fn persistent_rejection_reports_the_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\n\
                          content-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RUNNER_LOG);
        std::fs::write(&path, "contents").unwrap();

        let base = format!("http://{}", addr);
        let store = HttpArtifactStore::new(base.clone(), base.clone(), 2);
        let err = store
            .put_verified(&format!("{}/61/65261/7/{}", base, RUNNER_LOG), &path, "text/plain")
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("503"), "{}", message);
        assert!(message.contains("2 attempts"), "{}", message);
    }
}
