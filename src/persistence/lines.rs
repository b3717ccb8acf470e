//! Bounded line reading for JSON Lines files.
//!
//! `BufRead::read_line` allocates the full line before any length check, so
//! one multi-gigabyte line in a corrupted or hostile file would exhaust
//! memory before it could be rejected. [`BoundedLines`] reads through
//! `Read::take(max + 1)` into a byte buffer instead: an oversized line is
//! classified after at most `max + 1` bytes were buffered, and no bytes are
//! ever converted to a `String` here. Callers parse lines with
//! `serde_json::from_slice`.
//!
//! Every line is classified as one of:
//!
//! - [`LineRead::Complete`]: terminated by `\n`
//! - [`LineRead::IncompleteTail`]: the file ended without a terminator,
//!   typically the remains of a write interrupted by a crash
//! - [`LineRead::TooLarge`]: more than `max_line_bytes` bytes before the
//!   terminator. Iteration ends after this item, unless the reader was built
//!   with [`BoundedLines::resync_after_oversized`]: then the rest of the line
//!   is discarded in buffer-sized chunks and iteration resumes after its
//!   terminator.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Default per-line cap (4 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// A line read from the file, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number.
    pub number: u64,
    /// Byte offset of the first byte of the line.
    pub offset: u64,
    /// Line content, excluding the `\n` terminator.
    pub bytes: Vec<u8>,
    /// Bytes consumed from the file, including the terminator if present.
    pub consumed: u64,
}

impl RawLine {
    /// True if the line contains only ASCII whitespace.
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(u8::is_ascii_whitespace)
    }

    /// Byte offset just past this line.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.consumed
    }
}

/// Classification of one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    Complete(RawLine),
    IncompleteTail(RawLine),
    TooLarge {
        number: u64,
        offset: u64,
        /// Bytes buffered before the cap was hit; never more than `max + 1`.
        buffered: usize,
        /// Offset just past the line's terminator, when the reader skipped
        /// to it. `None` if the reader does not resync or the file ended
        /// first.
        resumed_at: Option<u64>,
    },
}

/// Iterator over the lines of a reader with a hard per-line byte cap.
pub struct BoundedLines<R> {
    reader: R,
    max_line_bytes: usize,
    offset: u64,
    number: u64,
    resync: bool,
    done: bool,
}

impl BoundedLines<BufReader<File>> {
    /// Opens `path` and starts reading at its first byte.
    pub fn open(path: &Path, max_line_bytes: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(BoundedLines::new(BufReader::new(file), max_line_bytes))
    }
}

impl<R: BufRead> BoundedLines<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        BoundedLines {
            reader,
            max_line_bytes,
            offset: 0,
            number: 0,
            resync: false,
            done: false,
        }
    }

    /// Continues past oversized lines instead of stopping at the first one.
    pub fn resync_after_oversized(mut self) -> Self {
        self.resync = true;
        self
    }

    /// Byte offset of the next unread line.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: BufRead> BoundedLines<R> {
    /// Discards input through the next `\n` without buffering it. Returns
    /// false if the input ended first.
    fn skip_past_newline(&mut self) -> io::Result<bool> {
        loop {
            let chunk = match self.reader.fill_buf() {
                Ok(chunk) => chunk,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if chunk.is_empty() {
                return Ok(false);
            }
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.reader.consume(pos + 1);
                    self.offset += pos as u64 + 1;
                    return Ok(true);
                }
                None => {
                    let n = chunk.len();
                    self.reader.consume(n);
                    self.offset += n as u64;
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for BoundedLines<R> {
    type Item = io::Result<LineRead>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        // One extra byte lets a maximal line still carry its terminator.
        let limit = self.max_line_bytes as u64 + 1;
        let mut buf: Vec<u8> = Vec::new();
        let read = match (&mut self.reader).take(limit).read_until(b'\n', &mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if read == 0 {
            self.done = true;
            return None;
        }

        self.number += 1;
        let offset = self.offset;
        self.offset += read as u64;

        if buf.last() == Some(&b'\n') {
            buf.pop();
            return Some(Ok(LineRead::Complete(RawLine {
                number: self.number,
                offset,
                bytes: buf,
                consumed: read as u64,
            })));
        }

        if buf.len() > self.max_line_bytes {
            let buffered = buf.len();
            let resumed_at = if self.resync {
                match self.skip_past_newline() {
                    Ok(found) => found.then_some(self.offset),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            } else {
                None
            };
            if resumed_at.is_none() {
                self.done = true;
            }
            return Some(Ok(LineRead::TooLarge {
                number: self.number,
                offset,
                buffered,
                resumed_at,
            }));
        }

        // Short read without a terminator: the take limit wasn't reached, so
        // this is EOF.
        self.done = true;
        Some(Ok(LineRead::IncompleteTail(RawLine {
            number: self.number,
            offset,
            bytes: buf,
            consumed: read as u64,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn collect(input: &[u8], max: usize) -> Vec<LineRead> {
        BoundedLines::new(Cursor::new(input.to_vec()), max)
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn complete_lines_carry_offsets() {
        let lines = collect(b"ab\ncde\n", 16);
        assert_eq!(lines.len(), 2);
        let LineRead::Complete(second) = &lines[1] else {
            panic!("expected complete line, got {:?}", lines[1]);
        };
        assert_eq!(second.number, 2);
        assert_eq!(second.offset, 3);
        assert_eq!(second.bytes, b"cde");
        assert_eq!(second.end_offset(), 7);
    }

    #[test]
    fn unterminated_last_line_is_incomplete_tail() {
        let lines = collect(b"ok\n{\"seq", 16);
        assert!(matches!(&lines[0], LineRead::Complete(_)));
        let LineRead::IncompleteTail(tail) = &lines[1] else {
            panic!("expected incomplete tail, got {:?}", lines[1]);
        };
        assert_eq!(tail.offset, 3);
        assert_eq!(tail.bytes, b"{\"seq");
    }

    #[test]
    fn line_of_exactly_max_bytes_is_accepted() {
        let lines = collect(b"abcd\nx\n", 4);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| matches!(l, LineRead::Complete(_))));
    }

    #[test]
    fn oversized_line_stops_iteration() {
        let lines = collect(b"ok\nabcdefgh\nafter\n", 4);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            LineRead::TooLarge {
                number: 2,
                offset: 3,
                buffered: 5,
                resumed_at: None,
            }
        );
    }

    #[test]
    fn resync_continues_after_oversized_line() {
        let input = b"ok
abcdefghij
after
";
        let lines: Vec<LineRead> = BoundedLines::new(Cursor::new(input.to_vec()), 4)
            .resync_after_oversized()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            LineRead::TooLarge {
                number: 2,
                offset: 3,
                buffered: 5,
                resumed_at: Some(14),
            }
        );
        let LineRead::Complete(after) = &lines[2] else {
            panic!("expected complete line, got {:?}", lines[2]);
        };
        assert_eq!(after.number, 3);
        assert_eq!(after.offset, 14);
        assert_eq!(after.bytes, b"after");
    }

    #[test]
    fn resync_reports_oversized_unterminated_tail() {
        let lines: Vec<LineRead> = BoundedLines::new(Cursor::new(b"ok
abcdefgh".to_vec()), 4)
            .resync_after_oversized()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert!(matches!(
            lines[1],
            LineRead::TooLarge { offset: 3, resumed_at: None, .. }
        ));
    }

    #[test]
    fn oversized_unterminated_tail_is_too_large() {
        let lines = collect(b"abcdefgh", 4);
        assert!(matches!(lines[0], LineRead::TooLarge { .. }));
    }

    #[test]
    fn huge_line_buffers_at_most_cap_plus_one() {
        let max = 1024;
        let mut input = vec![b'x'; 8 * 1024 * 1024];
        input.push(b'\n');
        let lines = collect(&input, max);
        assert_eq!(lines.len(), 1);
        let LineRead::TooLarge { buffered, .. } = lines[0] else {
            panic!("expected too large");
        };
        assert_eq!(buffered, max + 1);
    }

    #[test]
    fn blank_lines_are_reported_as_blank() {
        let lines = collect(b"\n  \t\n", 8);
        assert_eq!(lines.len(), 2);
        for line in lines {
            let LineRead::Complete(raw) = line else {
                panic!("expected complete");
            };
            assert!(raw.is_blank());
        }
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(collect(b"", 8).is_empty());
    }

    proptest! {
        /// Offsets and consumed byte counts tile the input exactly.
        #[test]
        fn offsets_tile_the_input(
            parts in prop::collection::vec("[a-z{}\":,]{0,20}", 0..20),
            trailing in "[a-z]{0,5}",
        ) {
            let mut input = Vec::new();
            for p in &parts {
                input.extend_from_slice(p.as_bytes());
                input.push(b'\n');
            }
            input.extend_from_slice(trailing.as_bytes());

            let mut expected_offset = 0u64;
            for item in collect(&input, 64) {
                let raw = match item {
                    LineRead::Complete(raw) | LineRead::IncompleteTail(raw) => raw,
                    LineRead::TooLarge { .. } => unreachable!("cap is above the generated length"),
                };
                prop_assert_eq!(raw.offset, expected_offset);
                expected_offset = raw.end_offset();
            }
            prop_assert_eq!(expected_offset, input.len() as u64);
        }
    }
}
