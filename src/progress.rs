//! Progress accounting for the fetch pipeline.
//!
//! The core only maintains counters; rendering them is the embedding UI's
//! business. The estimated total is fed by the manifest pre-scan so the
//! ratio reflects the whole known graph before any fetch begins.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Display unit for transfer byte counts, chosen from the content-length
/// hint when a transfer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteUnit {
    KiB,
    MiB,
}

impl ByteUnit {
    pub fn for_hint(hint: Option<u64>) -> ByteUnit {
        match hint {
            Some(len) if len >= 1024 * 1024 => ByteUnit::MiB,
            _ => ByteUnit::KiB,
        }
    }

    pub fn divisor(self) -> u64 {
        match self {
            ByteUnit::KiB => 1024,
            ByteUnit::MiB => 1024 * 1024,
        }
    }
}

#[derive(Debug, Default)]
pub struct ProgressNode {
    completed: AtomicUsize,
    estimated_total: AtomicUsize,
    bytes_read: AtomicU64,
    mib_unit: AtomicBool,
}

impl ProgressNode {
    pub fn new() -> Self {
        ProgressNode::default()
    }

    pub fn increase_estimated_total(&self, n: usize) {
        self.estimated_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn complete_one(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn estimated_total(&self) -> usize {
        self.estimated_total.load(Ordering::Relaxed)
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn set_unit(&self, unit: ByteUnit) {
        self.mib_unit
            .store(unit == ByteUnit::MiB, Ordering::Relaxed);
    }

    pub fn unit(&self) -> ByteUnit {
        if self.mib_unit.load(Ordering::Relaxed) {
            ByteUnit::MiB
        } else {
            ByteUnit::KiB
        }
    }
}

/// Transparent reader adapter which accounts every byte flowing through the
/// unpack pipeline against a progress node.
pub struct ProgressRead<'a, R> {
    inner: R,
    node: &'a ProgressNode,
}

impl<'a, R: Read> ProgressRead<'a, R> {
    pub fn new(inner: R, node: &'a ProgressNode, content_length: Option<u64>) -> Self {
        node.set_unit(ByteUnit::for_hint(content_length));
        ProgressRead { inner, node }
    }
}

impl<'a, R: Read> Read for ProgressRead<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.node.add_bytes(n as u64);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_follows_content_length_hint() {
        assert_eq!(ByteUnit::for_hint(None), ByteUnit::KiB);
        assert_eq!(ByteUnit::for_hint(Some(4 * 1024)), ByteUnit::KiB);
        assert_eq!(ByteUnit::for_hint(Some(8 * 1024 * 1024)), ByteUnit::MiB);
    }

    #[test]
    fn reader_accounts_bytes() {
        let node = ProgressNode::new();
        let data = vec![7u8; 4096];
        let mut reader = ProgressRead::new(&data[..], &node, Some(4096));
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        assert_eq!(node.bytes_read(), 4096);
        assert_eq!(node.unit(), ByteUnit::KiB);
    }
}
