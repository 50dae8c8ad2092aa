// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

/// Strip exactly one trailing line terminator (`\n` or `\r\n`).
pub fn strip_final_newline(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}

/// Ordered chunks of a process's standard output.
///
/// Chunks are only ever removed by [`OutputBuffer::clear`], which lets a test
/// reset the buffer before matching against output produced afterwards.
#[derive(Debug, Default, Clone)]
pub struct OutputBuffer {
    chunks: Vec<String>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &str) {
        self.chunks.push(strip_final_newline(chunk).to_string());
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// All chunks joined with a single newline.
    pub fn text(&self) -> String {
        self.chunks.join("\n")
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Turns a byte stream read in arbitrary pieces into text chunks.
///
/// A read that ends inside a multi-byte character is held back and merged
/// with the next one, so a character is never split across chunks. Invalid
/// bytes are replaced with `U+FFFD`.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read. Returns the decoded chunk once it ends on a character
    /// boundary.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        if incomplete_tail(&self.pending) > 0 {
            return None;
        }
        self.take()
    }

    /// Flush whatever is held back, at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Length of a truncated but so far valid character at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    // A truncated UTF-8 sequence is at most 3 bytes long.
    let mut rest = &bytes[bytes.len().saturating_sub(3)..];
    loop {
        match std::str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                Some(len) => rest = &rest[e.valid_up_to() + len..],
                None => return rest.len() - e.valid_up_to(),
            },
        }
    }
}
