//! Per-connection state: owned socket, the two buffers, the current
//! request/response pair, and the read/write/process cycle driven by the
//! reactor's worker tasks.

use std::io::{ErrorKind, IoSlice, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpStream;

use crate::buffer::ByteBuffer;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::sql_pool::{register_user, verify_login, SqlPool};

const LOGIN_PATH: &str = "/login.html";
const REGISTER_PATH: &str = "/register.html";

pub enum ReadOutcome {
    /// At least one byte was read (edge-triggered keeps reading until this
    /// turns into `WouldBlock`; level-triggered returns after one read).
    Progress,
    Eof,
    WouldBlock,
    Error,
}

pub enum WriteOutcome {
    Flushed,
    Pending,
    Error,
}

pub struct HttpConnection {
    pub stream: TcpStream,
    pub addr: SocketAddr,
    read_buf: ByteBuffer,
    write_buf: ByteBuffer,
    file_offset: usize,
    pub request: HttpRequest,
    pub response: HttpResponse,
    resource_dir: Arc<str>,
    edge_triggered: bool,
    pub closed_after_write: bool,
}

impl HttpConnection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        resource_dir: Arc<str>,
        edge_triggered: bool,
    ) -> Self {
        HttpConnection {
            stream,
            addr,
            read_buf: ByteBuffer::default(),
            write_buf: ByteBuffer::default(),
            file_offset: 0,
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            resource_dir,
            edge_triggered,
            closed_after_write: false,
        }
    }

    /// Drains the socket into the read buffer. Edge-triggered connections
    /// loop until `WouldBlock`; level-triggered connections read once per
    /// call, relying on the reactor to rearm on the next readiness event.
    pub fn read(&mut self) -> ReadOutcome {
        let mut progressed = false;
        loop {
            match self.read_buf.read_from_fd(&mut self.stream) {
                Ok(0) => return ReadOutcome::Eof,
                Ok(_) => {
                    progressed = true;
                    if !self.edge_triggered {
                        return ReadOutcome::Progress;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return if progressed {
                        ReadOutcome::Progress
                    } else {
                        ReadOutcome::WouldBlock
                    };
                }
                Err(_) => return ReadOutcome::Error,
            }
        }
    }

    /// Vectored-writes the pending response bytes: `write_buf` (headers,
    /// or the whole body for error responses) followed by whatever of the
    /// memory-mapped file body remains.
    pub fn write(&mut self) -> WriteOutcome {
        loop {
            let buf_slice = self.write_buf.peek();
            let file_slice = match self.response.file() {
                Some(f) if self.file_offset < f.len() => &f[self.file_offset..],
                _ => &[][..],
            };
            if buf_slice.is_empty() && file_slice.is_empty() {
                return WriteOutcome::Flushed;
            }

            let iov = [IoSlice::new(buf_slice), IoSlice::new(file_slice)];
            match self.stream.write_vectored(&iov) {
                Ok(0) => return WriteOutcome::Error,
                Ok(n) => {
                    let mut remaining = n;
                    if remaining > 0 && !buf_slice.is_empty() {
                        let take = remaining.min(buf_slice.len());
                        self.write_buf.retrieve(take);
                        remaining -= take;
                    }
                    if remaining > 0 {
                        self.file_offset += remaining;
                    }
                    if !self.edge_triggered {
                        let done = self.write_buf.readable() == 0
                            && self.file_offset >= self.response.file_len();
                        return if done { WriteOutcome::Flushed } else { WriteOutcome::Pending };
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return WriteOutcome::Pending,
                Err(_) => return WriteOutcome::Error,
            }
        }
    }

    /// Parses as much of a request as the read buffer currently holds and,
    /// once a full request is available, builds the response. Returns
    /// `true` when a response is ready to write, `false` if the buffer
    /// doesn't yet hold a complete request.
    pub fn process(&mut self, sql_pool: Option<&Arc<SqlPool>>) -> bool {
        if !self.request.parse(&mut self.read_buf) {
            if self.request.is_failed() {
                self.response = HttpResponse::new();
                self.response.init(&self.resource_dir, "/400.html", false, 400);
                self.response.make_response(&mut self.write_buf);
                self.file_offset = 0;
                self.closed_after_write = true;
                self.request.init();
                return true;
            }
            return false;
        }

        let keep_alive = self.request.is_keep_alive();
        let path = self.request.path().to_string();
        let method = self.request.method().to_string();

        self.response = HttpResponse::new();
        if method == "POST" && (path == LOGIN_PATH || path == REGISTER_PATH) {
            let target = self.handle_auth(&path, sql_pool);
            self.response.init(&self.resource_dir, target, keep_alive, -1);
        } else {
            self.response.init(&self.resource_dir, &path, keep_alive, -1);
        }

        self.response.make_response(&mut self.write_buf);
        self.file_offset = 0;
        self.closed_after_write = !keep_alive;
        self.request.init();
        true
    }

    fn handle_auth(&self, path: &str, sql_pool: Option<&Arc<SqlPool>>) -> &'static str {
        let username = self.request.get_post("username").unwrap_or("").to_string();
        let password = self.request.get_post("password").unwrap_or("").to_string();

        let Some(pool) = sql_pool else {
            proxy_log::warn!("auth request with no sql pool configured");
            return "/error.html";
        };
        let Ok(mut conn) = pool.get() else {
            proxy_log::warn!("failed to acquire sql connection for auth request");
            return "/error.html";
        };

        let verified = if path == LOGIN_PATH {
            verify_login(&mut conn, &username, &password)
        } else {
            register_user(&mut conn, &username, &password)
        };

        match verified {
            Ok(true) => "/welcome.html",
            Ok(false) => "/error.html",
            Err(e) => {
                proxy_log::warn!("sql error during auth: {e}");
                "/error.html"
            }
        }
    }

    /// Releases the file mapping and shuts the socket down. Safe to call
    /// more than once.
    pub fn close(&mut self) {
        self.response.unmap_file();
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener as StdListener;

    fn connected_pair() -> (TcpStream, std::net::TcpStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn malformed_request_produces_400_and_marks_close() {
        let (server, mut client) = connected_pair();
        client.write_all(b"GET / HTTP/x\r\n\r\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut conn = HttpConnection::new(
            server,
            "127.0.0.1:0".parse().unwrap(),
            Arc::from("resources"),
            false,
        );
        matches!(conn.read(), ReadOutcome::Progress | ReadOutcome::WouldBlock);
        let ready = conn.process(None);
        assert!(ready);
        assert!(conn.closed_after_write);
        assert_eq!(conn.response.code(), 400);
    }
}
