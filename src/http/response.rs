//! Builds an HTTP/1.1 response: status line, headers, and a body that is
//! either a memory-mapped file (2xx) or a small inline HTML page (error
//! codes), so the reactor can hand the body off to `writev` without an
//! extra copy in the common case.

use std::fs::{self, File};
use std::path::PathBuf;

use memmap2::Mmap;

use crate::buffer::ByteBuffer;

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

/// Maps an error status to a template file, relative to the resource
/// root, to use for its body if present.
fn template_path(code: u16) -> Option<&'static str> {
    match code {
        400 => Some("400.html"),
        403 => Some("403.html"),
        404 => Some("404.html"),
        405 => Some("405.html"),
        500 => Some("500.html"),
        _ => None,
    }
}

fn constant_body(code: u16) -> Vec<u8> {
    format!("<html><body><h1>{} {}</h1></body></html>", code, status_text(code)).into_bytes()
}

pub fn get_mime_type(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") => "text/html",
        Some("xml") => "text/xml",
        Some("xhtml") => "application/xhtml+xml",
        Some("txt") => "text/plain",
        Some("rtf") => "application/rtf",
        Some("pdf") => "application/pdf",
        Some("word") => "application/msword",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("au") => "audio/basic",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("avi") => "video/x-msvideo",
        Some("gz") => "application/x-gzip",
        Some("tar") => "application/x-tar",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        _ => "text/plain",
    }
}

pub struct HttpResponse {
    code: u16,
    keep_alive: bool,
    src_dir: PathBuf,
    resolved_path: PathBuf,
    mmap: Option<Mmap>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        HttpResponse {
            code: 200,
            keep_alive: false,
            src_dir: PathBuf::new(),
            resolved_path: PathBuf::new(),
            mmap: None,
        }
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Resolves `src_dir + path` and stats it, deciding the final status
    /// code: 404 if missing/directory, 403 if unreadable, else `code`
    /// (defaulting to 200 when `code` is negative/unset).
    pub fn init(&mut self, src_dir: &str, path: &str, keep_alive: bool, code: i32) {
        self.keep_alive = keep_alive;
        self.mmap = None;
        self.src_dir = PathBuf::from(src_dir);
        self.resolved_path = self.src_dir.join(path.trim_start_matches('/'));

        let meta = match fs::metadata(&self.resolved_path) {
            Ok(m) if m.is_file() => m,
            _ => {
                self.code = 404;
                return;
            }
        };

        #[cfg(unix)]
        let owner_readable = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode() & 0o400 != 0
        };
        #[cfg(not(unix))]
        let owner_readable = true;

        if !owner_readable {
            self.code = 403;
            return;
        }

        match File::open(&self.resolved_path).and_then(|f| unsafe { Mmap::map(&f) }) {
            Ok(mmap) => {
                self.mmap = Some(mmap);
                self.code = if code < 0 { 200 } else { code as u16 };
            }
            Err(_) => self.code = 500,
        }
    }

    pub fn file(&self) -> Option<&[u8]> {
        self.mmap.as_deref()
    }

    pub fn file_len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len())
    }

    pub fn unmap_file(&mut self) {
        self.mmap = None;
    }

    /// Writes the status line and headers (plus, for non-2xx responses,
    /// the inline body) into `buf`. The mapped file body, when present,
    /// is retrieved separately via `file()` for vectored writing.
    pub fn make_response(&mut self, buf: &mut ByteBuffer) {
        if !(200..300).contains(&self.code) {
            self.mmap = None;
        }

        let body = if (200..300).contains(&self.code) {
            None
        } else {
            Some(self.error_body())
        };

        let content_length = match &body {
            Some(b) => b.len(),
            None => self.file_len(),
        };
        let content_type = match &body {
            Some(_) => "text/html",
            None => get_mime_type(&self.resolved_path),
        };

        buf.append_str(&format!(
            "HTTP/1.1 {} {}\r\n",
            self.code,
            status_text(self.code)
        ));
        buf.append_str(&format!(
            "Connection: {}\r\n",
            if self.keep_alive { "keep-alive" } else { "close" }
        ));
        if self.keep_alive {
            buf.append_str("keep-alive: max=6, timeout=120\r\n");
        }
        buf.append_str(&format!("Content-Type: {content_type}\r\n"));
        buf.append_str(&format!("Content-length: {content_length}\r\n\r\n"));

        if let Some(b) = body {
            buf.append(&b);
        }
    }

    fn error_body(&self) -> Vec<u8> {
        if let Some(template) = template_path(self.code) {
            if let Ok(content) = fs::read(self.src_dir.join(template)) {
                return content;
            }
        }
        constant_body(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_404() {
        let dir = tempfile::tempdir().unwrap();
        let mut res = HttpResponse::new();
        res.init(dir.path().to_str().unwrap(), "/nope.html", true, -1);
        assert_eq!(res.code(), 404);
        assert!(res.file().is_none());
    }

    #[test]
    fn existing_file_yields_200_with_mapped_body() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("index.html");
        let mut f = File::create(&file_path).unwrap();
        f.write_all(b"hello, world\n").unwrap();
        drop(f);

        let mut res = HttpResponse::new();
        res.init(dir.path().to_str().unwrap(), "/index.html", true, -1);
        assert_eq!(res.code(), 200);
        assert_eq!(res.file().unwrap(), b"hello, world\n");
    }

    #[test]
    fn make_response_emits_status_line_and_headers() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("index.html");
        fs::write(&file_path, b"hi").unwrap();

        let mut res = HttpResponse::new();
        res.init(dir.path().to_str().unwrap(), "/index.html", true, -1);
        let mut buf = ByteBuffer::default();
        res.make_response(&mut buf);
        let head = buf.retrieve_all_as_string();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-length: 2"));
        assert!(head.contains("keep-alive: max=6, timeout=120"));
    }

    #[test]
    fn not_found_produces_inline_html_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut res = HttpResponse::new();
        res.init(dir.path().to_str().unwrap(), "/missing.html", true, -1);
        let mut buf = ByteBuffer::default();
        res.make_response(&mut buf);
        let out = buf.retrieve_all_as_string();
        assert!(out.contains("404"));
    }
}
