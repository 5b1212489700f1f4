use std::io;

/// Byte-capped output sink.
///
/// Writes always succeed and report the full input length as consumed, but
/// only the first `limit` bytes are retained; the remainder is discarded and
/// `truncated` is set. A limit of zero means unbounded. This is what keeps an
/// adversarial child from exhausting memory through stdout/stderr.
#[derive(Debug)]
pub struct LimitedWriter {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl LimitedWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Lossy UTF-8 view of the retained bytes.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

impl io::Write for LimitedWriter {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        if self.limit == 0 {
            self.buf.extend_from_slice(p);
            return Ok(p.len());
        }
        let remain = self.limit.saturating_sub(self.buf.len());
        if remain == 0 {
            self.truncated = true;
            return Ok(p.len());
        }
        if p.len() <= remain {
            self.buf.extend_from_slice(p);
        } else {
            self.buf.extend_from_slice(&p[..remain]);
            self.truncated = true;
        }
        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn retains_at_most_limit_bytes() {
        let mut w = LimitedWriter::new(5);
        assert_eq!(w.write(b"hello world").expect("write"), 11);
        assert_eq!(w.as_bytes(), b"hello");
        assert!(w.truncated());
    }

    #[test]
    fn exact_fit_is_not_truncated() {
        let mut w = LimitedWriter::new(5);
        w.write_all(b"hello").expect("write");
        assert_eq!(w.as_bytes(), b"hello");
        assert!(!w.truncated());
    }

    #[test]
    fn truncates_across_multiple_writes() {
        let mut w = LimitedWriter::new(4);
        w.write_all(b"ab").expect("write");
        assert!(!w.truncated());
        w.write_all(b"cdef").expect("write");
        assert_eq!(w.as_bytes(), b"abcd");
        assert!(w.truncated());
        // Fully-discarded follow-up writes still report success.
        assert_eq!(w.write(b"gh").expect("write"), 2);
        assert_eq!(w.len(), 4);
    }

    #[test]
    fn zero_limit_means_unbounded() {
        let mut w = LimitedWriter::new(0);
        let big = vec![b'x'; 1 << 16];
        w.write_all(&big).expect("write");
        assert_eq!(w.len(), big.len());
        assert!(!w.truncated());
    }
}
