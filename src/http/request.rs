//! Incremental HTTP/1.1 request parser, fed a line at a time from a
//! connection's read buffer.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::buffer::ByteBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finish,
    Failed,
}

fn well_known_pages() -> &'static HashSet<&'static str> {
    static PAGES: OnceLock<HashSet<&'static str>> = OnceLock::new();
    PAGES.get_or_init(|| {
        ["/index", "/register", "/login", "/welcome", "/video", "/picture"]
            .into_iter()
            .collect()
    })
}

#[derive(Debug)]
pub struct HttpRequest {
    state: ParseState,
    method: String,
    path: String,
    version: String,
    body: String,
    headers: HashMap<String, String>,
    post: HashMap<String, String>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        HttpRequest::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            state: ParseState::RequestLine,
            method: String::new(),
            path: String::new(),
            version: String::new(),
            body: String::new(),
            headers: HashMap::new(),
            post: HashMap::new(),
        }
    }

    pub fn init(&mut self) {
        self.state = ParseState::RequestLine;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.body.clear();
        self.headers.clear();
        self.post.clear();
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|s| s.as_str())
    }

    pub fn get_post(&self, key: &str) -> Option<&str> {
        self.post.get(key).map(|s| s.as_str())
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParseState::Finish
    }

    pub fn is_failed(&self) -> bool {
        self.state == ParseState::Failed
    }

    pub fn is_keep_alive(&self) -> bool {
        self.version == "1.1"
            && self
                .headers
                .get("Connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"))
    }

    /// Consumes complete CRLF-delimited lines (and, once in the body
    /// state, the request body) out of `buf`. Returns `true` only once
    /// `Finish` is reached; returns `false` both when the buffer doesn't
    /// yet hold a complete request (the caller keeps the buffer for the
    /// next readiness cycle) and when parsing has failed — callers must
    /// check `is_failed()` to tell those two apart.
    pub fn parse(&mut self, buf: &mut ByteBuffer) -> bool {
        loop {
            match self.state {
                ParseState::Finish => return true,
                ParseState::Failed => return false,
                ParseState::Body => {
                    if !self.consume_body(buf) {
                        return false;
                    }
                }
                ParseState::RequestLine | ParseState::Headers => {
                    let Some(line) = take_line(buf) else { return false };
                    match self.state {
                        ParseState::RequestLine => self.parse_request_line(&line),
                        ParseState::Headers => self.parse_header_line(&line),
                        _ => unreachable!(),
                    }
                }
            }
        }
    }

    fn parse_request_line(&mut self, line: &str) {
        let mut parts = line.splitn(3, ' ');
        let (Some(method), Some(path), Some(version_part)) =
            (parts.next(), parts.next(), parts.next())
        else {
            self.state = ParseState::Failed;
            return;
        };
        let Some(version) = version_part.strip_prefix("HTTP/") else {
            self.state = ParseState::Failed;
            return;
        };
        if method.is_empty() || path.is_empty() || !matches!(method, "GET" | "POST") {
            self.state = ParseState::Failed;
            return;
        }
        self.method = method.to_string();
        self.path = normalize_path(path);
        self.version = version.to_string();
        self.state = ParseState::Headers;
    }

    fn parse_header_line(&mut self, line: &str) {
        if line.is_empty() {
            self.state = if self.method == "POST" {
                ParseState::Body
            } else {
                ParseState::Finish
            };
            return;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                self.headers
                    .insert(key.trim().to_string(), value.trim_start().to_string());
            }
            None => self.state = ParseState::Failed,
        }
    }

    fn consume_body(&mut self, buf: &mut ByteBuffer) -> bool {
        let content_length = self
            .headers
            .get("Content-Length")
            .and_then(|v| v.parse::<usize>().ok());

        match content_length {
            Some(n) => {
                if buf.readable() < n {
                    return false;
                }
                let bytes = buf.peek()[..n].to_vec();
                buf.retrieve(n);
                self.body = String::from_utf8_lossy(&bytes).into_owned();
            }
            None => {
                self.body = buf.retrieve_all_as_string();
            }
        }

        if self.header("Content-Type") == Some("application/x-www-form-urlencoded") {
            self.parse_urlencoded();
        }
        self.state = ParseState::Finish;
        true
    }

    fn parse_urlencoded(&mut self) {
        let body = self.body.clone();
        for pair in body.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            self.post.insert(decode_form(k), decode_form(v));
        }
    }
}

fn normalize_path(path: &str) -> String {
    if well_known_pages().contains(path) {
        format!("{path}.html")
    } else {
        path.to_string()
    }
}

fn decode_form(s: &str) -> String {
    let plus_decoded = s.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|c| c.into_owned())
        .unwrap_or(plus_decoded)
}

/// Pulls one CRLF-terminated line out of `buf`, leaving the buffer
/// untouched (for the next readiness cycle) if no terminator is present
/// yet.
fn take_line(buf: &mut ByteBuffer) -> Option<String> {
    let pos = find_subsequence(buf.peek(), b"\r\n")?;
    let line = String::from_utf8_lossy(&buf.peek()[..pos]).into_owned();
    buf.retrieve(pos + 2);
    Some(line)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(lines: &[&str]) -> ByteBuffer {
        let mut buf = ByteBuffer::default();
        buf.append(lines.join("\r\n").as_bytes());
        buf
    }

    #[test]
    fn parses_simple_get() {
        let mut buf = feed(&[
            "GET /index.html HTTP/1.1",
            "Host: example.com",
            "Connection: keep-alive",
            "",
            "",
        ]);
        let mut req = HttpRequest::new();
        assert!(req.parse(&mut buf));
        assert_eq!(req.method(), "GET");
        assert_eq!(req.path(), "/index.html");
        assert_eq!(req.version(), "1.1");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn well_known_page_gets_html_suffix() {
        let mut buf = feed(&["GET /login HTTP/1.1", "", ""]);
        let mut req = HttpRequest::new();
        assert!(req.parse(&mut buf));
        assert_eq!(req.path(), "/login.html");
    }

    #[test]
    fn malformed_request_line_fails() {
        let mut buf = feed(&["GET / HTTP/x", "", ""]);
        let mut req = HttpRequest::new();
        assert!(!req.parse(&mut buf));
        assert!(req.is_failed());
    }

    #[test]
    fn incomplete_request_returns_false_without_failing() {
        let mut buf = ByteBuffer::default();
        buf.append(b"GET /index.html HTTP/1.1\r\n");
        let mut req = HttpRequest::new();
        assert!(!req.parse(&mut buf));
        assert!(!req.is_failed());
    }

    #[test]
    fn parses_post_urlencoded_body() {
        let mut buf = feed(&[
            "POST /login HTTP/1.1",
            "Content-Type: application/x-www-form-urlencoded",
            "Content-Length: 28",
            "",
            "username=alice&password=se+t",
        ]);
        let mut req = HttpRequest::new();
        assert!(req.parse(&mut buf));
        assert_eq!(req.get_post("username"), Some("alice"));
        assert_eq!(req.get_post("password"), Some("se t"));
    }

    #[test]
    fn parser_idempotence_across_fresh_instances() {
        let lines = [
            "GET /picture HTTP/1.1",
            "Host: a",
            "Connection: keep-alive",
            "",
            "",
        ];
        let mut buf1 = feed(&lines);
        let mut buf2 = feed(&lines);
        let mut req1 = HttpRequest::new();
        let mut req2 = HttpRequest::new();
        req1.parse(&mut buf1);
        req2.parse(&mut buf2);
        assert_eq!(req1.method(), req2.method());
        assert_eq!(req1.path(), req2.path());
        assert_eq!(req1.version(), req2.version());
    }
}
