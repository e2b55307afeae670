// src/io/serial/framer.rs
//
// Newline framing for the receiver thread.
// The port runs in raw mode, so a read may hold part of a line or several
// lines; bytes are buffered here until a `\n` completes one.

const LINE_DELIMITER: u8 = b'\n';

/// One complete line, without its `\n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramedLine {
    pub bytes: Vec<u8>,
    /// The line ran past the length cap and lost its tail.
    pub truncated: bool,
}

pub struct LineFramer {
    buffer: Vec<u8>,
    max_length: usize,
    /// Dropping the tail of an over-long line until its `\n` arrives.
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_length: usize) -> Self {
        let max_length = max_length.max(1);
        LineFramer {
            buffer: Vec::with_capacity(max_length),
            max_length,
            discarding: false,
        }
    }

    /// Feed received bytes; returns every line they complete.
    ///
    /// A line that grows past `max_length` bytes is emitted as soon as the
    /// first excess byte arrives, marked truncated, and the rest of it is
    /// skipped up to its `\n`.
    pub fn feed(&mut self, data: &[u8]) -> Vec<FramedLine> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == LINE_DELIMITER {
                if self.discarding {
                    self.discarding = false;
                } else {
                    lines.push(FramedLine {
                        bytes: std::mem::take(&mut self.buffer),
                        truncated: false,
                    });
                }
                continue;
            }
            if self.discarding {
                continue;
            }

            // Force split once the line outgrows max length
            if self.buffer.len() >= self.max_length {
                lines.push(FramedLine {
                    bytes: std::mem::take(&mut self.buffer),
                    truncated: true,
                });
                self.discarding = true;
                continue;
            }

            self.buffer.push(byte);
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(lines: &[FramedLine]) -> Vec<&[u8]> {
        lines.iter().map(|l| l.bytes.as_slice()).collect()
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut framer = LineFramer::new(255);
        assert!(framer.feed(b"sli").is_empty());
        let lines = framer.feed(b"der 40\r\n");
        assert_eq!(text(&lines), vec![&b"slider 40\r"[..]]);
        assert!(!lines[0].truncated);
    }

    #[test]
    fn test_several_lines_in_one_read() {
        let mut framer = LineFramer::new(255);
        let lines = framer.feed(b"a\nb\nc");
        assert_eq!(text(&lines), vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(text(&framer.feed(b"\n")), vec![&b"c"[..]]);
    }

    #[test]
    fn test_empty_lines_are_framed() {
        let mut framer = LineFramer::new(255);
        assert_eq!(text(&framer.feed(b"\n\n")), vec![&b""[..], &b""[..]]);
    }

    #[test]
    fn test_over_long_line_is_cut_and_tail_skipped() {
        let mut framer = LineFramer::new(4);
        let lines = framer.feed(b"012345");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].bytes, b"0123".to_vec());
        assert!(lines[0].truncated);

        // Tail of the long line ends here; the next line is framed normally.
        assert!(framer.feed(b"67\n").is_empty());
        assert_eq!(text(&framer.feed(b"ok\n")), vec![&b"ok"[..]]);
    }

    #[test]
    fn test_line_at_exact_cap_is_whole() {
        let mut framer = LineFramer::new(4);
        let lines = framer.feed(b"0123\n");
        assert_eq!(text(&lines), vec![&b"0123"[..]]);
        assert!(!lines[0].truncated);
    }
}
