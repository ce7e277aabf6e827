//! Static file serving from a jailed root directory.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::request::Request;
use crate::response::Response;
use crate::status::StatusCode;

/// Serves files from `root`; paths resolving outside the root are refused.
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(root: P) -> StaticFiles {
        StaticFiles { root: root.into() }
    }

    /// Serves the file named by the request.
    ///
    /// When mounted under a `*path` catch-all the captured remainder is
    /// used; otherwise the full request path is. Returns `false` when
    /// nothing was served, so a router can fall through to 404.
    pub fn handle(&self, req: &Request, res: &mut Response) -> bool {
        let rel = req
            .param("path")
            .unwrap_or_else(|| req.path())
            .trim_start_matches('/')
            .to_string();
        self.serve(&rel, res)
    }

    /// Serves `rel` (relative to the root) into the response.
    pub fn serve(&self, rel: &str, res: &mut Response) -> bool {
        let mut target = self.root.join(rel);
        if target.is_dir() {
            target = target.join("index.html");
        }

        let root = match fs::canonicalize(&self.root) {
            Ok(root) => root,
            Err(e) => {
                warn!(error = %e, "static root unavailable");
                return false;
            }
        };
        let resolved = match fs::canonicalize(&target) {
            Ok(resolved) => resolved,
            Err(_) => return false,
        };
        if !resolved.starts_with(&root) {
            debug!(path = rel, "path escapes static root");
            res.send_text(StatusCode::FORBIDDEN, "Forbidden");
            return true;
        }

        match fs::read(&resolved) {
            Ok(contents) => {
                res.set_status(StatusCode::OK);
                res.set_header("Content-Type", mime_type(&resolved));
                res.set_body(Bytes::from(contents));
                true
            }
            Err(e) => {
                debug!(path = rel, error = %e, "static read failed");
                false
            }
        }
    }
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::StaticFiles;
    use crate::response::Response;
    use crate::status::StatusCode;

    fn fixture() -> (tempfile::TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/site.css"), "body{}").unwrap();
        let files = StaticFiles::new(dir.path());
        (dir, files)
    }

    #[test]
    fn serves_nested_file_with_mime() {
        let (_dir, files) = fixture();
        let mut res = Response::new();
        assert!(files.serve("css/site.css", &mut res));
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(Some("text/css"), res.headers().get("content-type"));
        assert_eq!(b"body{}", res.body());
    }

    #[test]
    fn directory_falls_back_to_index() {
        let (_dir, files) = fixture();
        let mut res = Response::new();
        assert!(files.serve("", &mut res));
        assert_eq!(Some("text/html"), res.headers().get("content-type"));
        assert_eq!(b"<h1>home</h1>", res.body());
    }

    #[test]
    fn missing_file_is_a_miss() {
        let (_dir, files) = fixture();
        let mut res = Response::new();
        assert!(!files.serve("nope.txt", &mut res));
    }

    #[test]
    fn traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("public")).unwrap();
        fs::write(dir.path().join("secret.txt"), "keys").unwrap();
        let files = StaticFiles::new(dir.path().join("public"));

        let mut res = Response::new();
        assert!(files.serve("../secret.txt", &mut res));
        assert_eq!(StatusCode::FORBIDDEN, res.status());
        assert_ne!(b"keys", res.body());
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        let (dir, files) = fixture();
        fs::write(dir.path().join("blob.bin"), [0u8, 1, 2]).unwrap();
        let mut res = Response::new();
        assert!(files.serve("blob.bin", &mut res));
        assert_eq!(
            Some("application/octet-stream"),
            res.headers().get("content-type")
        );
    }
}
