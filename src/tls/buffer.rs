use std::io;

/// A growable byte buffer with independent read and write cursors, used
/// to hold ciphertext in flight between the socket and the TLS engine.
///
/// Bytes are appended at the end and consumed from the front; the buffer
/// compacts itself once fully drained instead of on every read, the same
/// amortized-copy tradeoff a ring buffer makes without the wraparound
/// bookkeeping.
#[derive(Default)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos >= self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    pub fn consume(&mut self, n: usize) {
        self.read_pos += n;
        debug_assert!(self.read_pos <= self.data.len());
        if self.is_empty() {
            self.data.clear();
            self.read_pos = 0;
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        if self.read_pos > 0 && self.read_pos == self.data.len() {
            self.data.clear();
            self.read_pos = 0;
        }
        self.data.reserve(additional);
    }
}

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for Buffer {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.len());
        out[..n].copy_from_slice(&self.readable()[..n]);
        self.consume(n);
        Ok(n)
    }
}
