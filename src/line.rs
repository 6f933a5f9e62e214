// gpsd-stream - Resilient gpsd JSON client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Line accumulation
//!
//! [`LineBuffer`] collects bytes from arbitrary-sized reads and hands out
//! complete newline-terminated lines. A line may span any number of reads;
//! the trailing partial line is kept until its terminator arrives.

/// Default size of a single transport read. RTCM3 reports can exceed 4 KiB.
pub const DEFAULT_READ_SIZE: usize = 8192;

/// Byte buffer that yields complete lines
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes already scanned for a newline without finding one
    scanned: usize,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Whether a complete line is buffered
    pub fn has_line(&self) -> bool {
        self.buf[self.scanned..].contains(&b'\n')
    }

    /// Remove and return the next complete line, terminator included
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        match self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let eol = self.scanned + pos + 1;
                let rest = self.buf.split_off(eol);
                let line = std::mem::replace(&mut self.buf, rest);
                self.scanned = 0;
                Some(line)
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Bytes held back waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}
