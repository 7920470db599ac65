//! Coordinator-side input scanning and result formatting.
//!
//! The input source supplies exactly one integer `N`, then `3N` scalars for
//! array A, then `3N` for array B, as whitespace-separated tokens that may
//! span lines. A short or unparsable read is a fatal input error; partial
//! reads are never tolerated.

use crate::kernel::Vec3;
use crate::{Error, Result};
use std::collections::VecDeque;
use std::io::{BufRead, Write};

/// Whitespace-token scanner over a buffered reader.
pub struct InputScanner<R> {
    reader: R,
    pending: VecDeque<String>,
}

impl<R: BufRead> InputScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
        }
    }

    fn next_token(&mut self) -> Result<String> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| Error::Input(e.to_string()))?;
            if read == 0 {
                return Err(Error::Input("Unexpected end of input".into()));
            }
            self.pending
                .extend(line.split_whitespace().map(str::to_owned));
        }
    }

    /// Reads the vector count `N`.
    pub fn read_vector_count(&mut self) -> Result<usize> {
        let token = self.next_token()?;
        token
            .parse()
            .map_err(|_| Error::Input(format!("Invalid vector count {token:?}")))
    }

    /// Reads exactly `count` scalars, in order.
    pub fn read_scalars(&mut self, count: usize) -> Result<Vec<f32>> {
        let mut scalars = Vec::with_capacity(count);
        for _ in 0..count {
            let token = self.next_token()?;
            let value: f32 = token
                .parse()
                .map_err(|_| Error::Input(format!("Invalid scalar {token:?}")))?;
            scalars.push(value);
        }
        Ok(scalars)
    }
}

/// Writes the result array to the sink, one vector per line in index order.
pub fn write_vectors<W: Write>(out: &mut W, flat: &[f32]) -> Result<()> {
    let vectors: &[Vec3] = bytemuck::cast_slice(flat);
    for (i, v) in vectors.iter().enumerate() {
        writeln!(out, "Vector {}: <{:.1}, {:.1}, {:.1}>", i, v.x, v.y, v.z)
            .map_err(|e| Error::Output(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn tokens_may_span_lines_and_spaces() {
        let mut scanner = InputScanner::new(Cursor::new("2\n1 0 0\n0\t1 0\n"));
        assert_eq!(scanner.read_vector_count().unwrap(), 2);
        assert_eq!(
            scanner.read_scalars(6).unwrap(),
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn short_read_is_fatal() {
        let mut scanner = InputScanner::new(Cursor::new("1\n1 0\n"));
        scanner.read_vector_count().unwrap();
        assert!(matches!(scanner.read_scalars(3), Err(Error::Input(_))));
    }

    #[test]
    fn non_numeric_count_is_fatal() {
        let mut scanner = InputScanner::new(Cursor::new("four\n"));
        assert!(matches!(scanner.read_vector_count(), Err(Error::Input(_))));
    }

    #[test]
    fn non_numeric_scalar_is_fatal() {
        let mut scanner = InputScanner::new(Cursor::new("1 2 x\n"));
        assert!(matches!(scanner.read_scalars(3), Err(Error::Input(_))));
    }

    #[test]
    fn report_format_matches_one_decimal_place() {
        let mut out = Vec::new();
        write_vectors(&mut out, &[0.0, 0.0, 1.0, 0.0, 0.0, -1.0]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Vector 0: <0.0, 0.0, 1.0>\nVector 1: <0.0, 0.0, -1.0>\n"
        );
    }

    #[test]
    fn empty_result_writes_nothing() {
        let mut out = Vec::new();
        write_vectors(&mut out, &[]).unwrap();
        assert!(out.is_empty());
    }
}
