//! The reactor: binds the listener, runs the event loop, and owns the
//! poller, timer heap, and connection map. All I/O payload work (read,
//! parse, respond, write) is handed to the worker pool; this thread only
//! touches the poller, the timer, and the connection map.

use std::collections::HashMap;
use std::io::{ErrorKind, Write as _};
use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use mio::net::TcpListener;
use mio::Interest;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::http_connection::{HttpConnection, ReadOutcome, WriteOutcome};
use crate::poller::{Poller, Readiness, DEFAULT_CAPACITY};
use crate::sql_pool::SqlPool;
use crate::timer::TimingHeap;
use crate::worker_pool::WorkerPool;

/// Matches the reference project's hard cap on simultaneously open
/// connections.
const MAX_FD: usize = 65_536;
const LISTEN_TOKEN: usize = 0;

enum ReactorCommand {
    Rearm(usize, Interest),
    Close(usize),
}

pub struct Server {
    listener: TcpListener,
    poller: Poller,
    timers: TimingHeap,
    connections: HashMap<usize, Arc<Mutex<HttpConnection>>>,
    workers: WorkerPool,
    sql_pool: Option<Arc<SqlPool>>,
    config: Arc<ServerConfig>,
    resource_dir: Arc<str>,
    next_token: usize,
    cmd_tx: Sender<ReactorCommand>,
    cmd_rx: Receiver<ReactorCommand>,
    listener_et: bool,
    conn_et: bool,
}

impl Server {
    /// The address actually bound, useful when `config.port == 0` hands
    /// out an OS-assigned ephemeral port (tests only; production configs
    /// always specify a port in 1024..=65535).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn new(config: Arc<ServerConfig>, sql_pool: Option<Arc<SqlPool>>) -> Result<Self> {
        let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
        let mut listener = TcpListener::bind(addr)?;

        let mut poller = Poller::new(DEFAULT_CAPACITY)?;
        poller.add(LISTEN_TOKEN, &mut listener, Interest::READABLE);

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let workers = WorkerPool::new(config.thread_count);
        let resource_dir: Arc<str> = Arc::from(config.resource_dir.as_str());

        // bit 1 selects listener trigger mode, bit 0 selects connection
        // trigger mode, matching the reference project's `trig_mode` table.
        let listener_et = config.trig_mode & 0b10 != 0;
        let conn_et = config.trig_mode & 0b01 != 0;

        proxy_log::info!("listening on {addr} (trig_mode={})", config.trig_mode);

        Ok(Server {
            listener,
            poller,
            timers: TimingHeap::new(),
            connections: HashMap::new(),
            workers,
            sql_pool,
            config,
            resource_dir,
            next_token: LISTEN_TOKEN + 1,
            cmd_tx,
            cmd_rx,
            listener_et,
            conn_et,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            let timeout_ms = if self.config.timeout_ms == 0 {
                -1
            } else {
                self.timers.next_tick_ms()
            };
            // `next_tick_ms` just fired any expired timers, which enqueue
            // `Close` commands rather than closing synchronously; drain them
            // now, before a possibly-indefinite `wait`, or a connection whose
            // timer was the only one left would never actually get closed.
            self.drain_commands();
            self.poller.wait(timeout_ms)?;

            let events: Vec<Readiness> = self.poller.readiness_events().collect();
            for ev in events {
                if ev.fd == LISTEN_TOKEN {
                    self.accept_loop();
                    continue;
                }
                if !self.connections.contains_key(&ev.fd) {
                    continue;
                }
                if ev.error_or_hup {
                    self.close_conn(ev.fd);
                    continue;
                }
                if ev.readable {
                    self.timers.adjust(ev.fd as i32, self.config.timeout_ms);
                    self.dispatch_read(ev.fd);
                } else if ev.writable {
                    self.timers.adjust(ev.fd as i32, self.config.timeout_ms);
                    self.dispatch_write(ev.fd);
                }
            }

            self.drain_commands();
        }
    }

    fn accept_loop(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.connections.len() >= MAX_FD {
                        let _ = stream.write_all(
                            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 13\r\n\r\nServer busy!\n",
                        );
                        continue;
                    }

                    let token = self.next_token;
                    self.next_token += 1;

                    if !self.poller.add(token, &mut stream, Interest::READABLE) {
                        proxy_log::warn!("failed to register connection fd {token}");
                        continue;
                    }

                    let conn = HttpConnection::new(
                        stream,
                        addr,
                        self.resource_dir.clone(),
                        self.conn_et,
                    );
                    self.connections.insert(token, Arc::new(Mutex::new(conn)));

                    if self.config.timeout_ms > 0 {
                        let tx = self.cmd_tx.clone();
                        self.timers.add(token as i32, self.config.timeout_ms, Box::new(move || {
                            let _ = tx.send(ReactorCommand::Close(token));
                        }));
                    }
                    proxy_log::debug!("accepted connection {token} from {addr}");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    proxy_log::warn!("accept error: {e}");
                    break;
                }
            }
            if !self.listener_et {
                break;
            }
        }
    }

    fn dispatch_read(&mut self, token: usize) {
        let Some(conn) = self.connections.get(&token).cloned() else { return };
        {
            let mut guard = conn.lock().unwrap();
            self.poller.remove(&mut guard.stream);
        }
        let tx = self.cmd_tx.clone();
        let sql_pool = self.sql_pool.clone();
        self.workers.add_task(move || {
            let mut guard = conn.lock().unwrap();
            match guard.read() {
                ReadOutcome::Eof | ReadOutcome::Error => {
                    drop(guard);
                    let _ = tx.send(ReactorCommand::Close(token));
                    return;
                }
                ReadOutcome::WouldBlock => {
                    drop(guard);
                    let _ = tx.send(ReactorCommand::Rearm(token, Interest::READABLE));
                    return;
                }
                ReadOutcome::Progress => {}
            }
            let ready = guard.process(sql_pool.as_ref());
            drop(guard);
            let interest = if ready { Interest::WRITABLE } else { Interest::READABLE };
            let _ = tx.send(ReactorCommand::Rearm(token, interest));
        });
    }

    fn dispatch_write(&mut self, token: usize) {
        let Some(conn) = self.connections.get(&token).cloned() else { return };
        {
            let mut guard = conn.lock().unwrap();
            self.poller.remove(&mut guard.stream);
        }
        let tx = self.cmd_tx.clone();
        self.workers.add_task(move || {
            let mut guard = conn.lock().unwrap();
            match guard.write() {
                WriteOutcome::Flushed => {
                    let should_close = guard.closed_after_write;
                    guard.response.unmap_file();
                    drop(guard);
                    if should_close {
                        let _ = tx.send(ReactorCommand::Close(token));
                    } else {
                        let _ = tx.send(ReactorCommand::Rearm(token, Interest::READABLE));
                    }
                }
                WriteOutcome::Pending => {
                    drop(guard);
                    let _ = tx.send(ReactorCommand::Rearm(token, Interest::WRITABLE));
                }
                WriteOutcome::Error => {
                    drop(guard);
                    let _ = tx.send(ReactorCommand::Close(token));
                }
            }
        });
    }

    /// Applies rearm/close requests queued by worker tasks. Run on the
    /// reactor thread both before `poller.wait` (to apply anything a timer
    /// callback just enqueued) and after each dispatch cycle, so the poller
    /// and connection map are never touched from a worker thread.
    ///
    /// `dispatch_read`/`dispatch_write` deregister a connection's fd the
    /// moment its worker task is handed off, so at most one task is ever
    /// in flight per connection; `Rearm` here re-registers it with `add`
    /// (not `modify`) since the fd is no longer known to the poller.
    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                ReactorCommand::Rearm(token, interest) => {
                    if let Some(conn) = self.connections.get(&token) {
                        let mut guard = conn.lock().unwrap();
                        if !self.poller.add(token, &mut guard.stream, interest) {
                            proxy_log::warn!("failed to rearm connection fd {token}");
                        }
                    }
                }
                ReactorCommand::Close(token) => self.close_conn(token),
            }
        }
    }

    /// Idempotent: a connection already removed from the map is a no-op,
    /// which reconciles the race between a timer expiry and a worker task
    /// still touching the same fd.
    fn close_conn(&mut self, token: usize) {
        if let Some(conn) = self.connections.remove(&token) {
            let mut guard = conn.lock().unwrap();
            self.poller.remove(&mut guard.stream);
            guard.close();
            drop(guard);
            self.timers.erase(token as i32);
            proxy_log::debug!("closed connection {token}");
        }
    }
}
