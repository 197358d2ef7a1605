//! Line splitting for inbound text.
//!
//! A line ends at `\n`, `\r\n` or a lone `\r`. A trailing line without a
//! terminator is still returned at EOF. Malformed UTF-8 is replaced rather
//! than failing the session.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

pub struct LineReader<R> {
    inner: BufReader<R>,
    // The last line ended in `\r`; a `\n` right after it belongs to that line.
    skip_lf: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        LineReader {
            inner: BufReader::new(reader),
            skip_lf: false,
        }
    }

    pub fn with_capacity(capacity: usize, reader: R) -> Self {
        LineReader {
            inner: BufReader::with_capacity(capacity, reader),
            skip_lf: false,
        }
    }

    /// Next line without its terminator, or `None` once the peer is done.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                self.skip_lf = false;
                return Ok(if line.is_empty() { None } else { Some(decode(line)) });
            }

            let start = if self.skip_lf && available[0] == b'\n' { 1 } else { 0 };
            self.skip_lf = false;

            let rest = &available[start..];
            match rest.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(end) => {
                    line.extend_from_slice(&rest[..end]);
                    let ended_in_cr = rest[end] == b'\r';
                    self.inner.consume(start + end + 1);
                    self.skip_lf = ended_in_cr;
                    return Ok(Some(decode(line)));
                }
                None => {
                    line.extend_from_slice(rest);
                    let used = available.len();
                    self.inner.consume(used);
                }
            }
        }
    }
}

fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
