//! Growable read/write byte buffer with scatter/gather I/O helpers.
//!
//! Layout: `[0, read_pos)` prependable, `[read_pos, write_pos)` readable,
//! `[write_pos, len)` writable. Cursors only move forward; `retrieve_all`
//! is the only way back to the start.

use std::io::{self, IoSliceMut, Read, Write};

const INIT_BUFFER_SIZE: usize = 1024;
const SCRATCH_SIZE: usize = 65535;

pub struct ByteBuffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new(INIT_BUFFER_SIZE)
    }
}

impl ByteBuffer {
    pub fn new(init_size: usize) -> Self {
        ByteBuffer {
            buf: vec![0u8; init_size],
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn writable(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    pub fn prependable(&self) -> usize {
        self.read_pos
    }

    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    pub fn ensure_writeable(&mut self, len: usize) {
        if self.writable() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable() >= len);
    }

    fn has_written(&mut self, len: usize) {
        self.write_pos += len;
    }

    /// Advances the read cursor by `len`. Panics if `len > readable()`,
    /// matching the assertion in the reference implementation.
    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable());
        self.read_pos += len;
    }

    pub fn retrieve_all(&mut self) {
        self.buf.iter_mut().for_each(|b| *b = 0);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    pub fn retrieve_all_as_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    fn begin_write(&mut self) -> &mut [u8] {
        let pos = self.write_pos;
        &mut self.buf[pos..]
    }

    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writeable(data.len());
        let pos = self.write_pos;
        self.buf[pos..pos + data.len()].copy_from_slice(data);
        self.has_written(data.len());
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Scatter read: one vectored read into the buffer's writable tail plus
    /// a 64KiB scratch area, so an edge-triggered readable event is always
    /// fully drainable in a single call regardless of how little room is
    /// left in the buffer. On Unix, `Read::read_vectored` is backed by a
    /// real `readv(2)`, giving the same guarantee the reference
    /// implementation gets from calling `readv` directly.
    pub fn read_from_fd<T: Read>(&mut self, stream: &mut T) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let writeable = self.writable();
        let n = {
            let mut bufs = [
                IoSliceMut::new(self.begin_write()),
                IoSliceMut::new(&mut scratch),
            ];
            stream.read_vectored(&mut bufs)?
        };
        if n <= writeable {
            self.write_pos += n;
        } else {
            self.write_pos = self.buf.len();
            self.append(&scratch[..n - writeable]);
        }
        Ok(n)
    }

    /// Writes the readable region in a single `write`, advancing the read
    /// cursor by however much was actually accepted.
    pub fn write_to_fd<T: Write>(&mut self, stream: &mut T) -> io::Result<usize> {
        let n = stream.write(self.peek())?;
        self.read_pos += n;
        Ok(n)
    }

    fn make_space(&mut self, len: usize) {
        if self.writable() + self.prependable() < len {
            self.buf.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable();
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }
}
