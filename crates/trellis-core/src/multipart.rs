//! Streaming `multipart/form-data` consumer
//!
//! [`Multipart`] wraps any [`Read`] and yields one [`Part`] at a time. Part
//! content is itself a reader that stops at the next delimiter, so uploads
//! can be copied to disk without holding them in memory. Size ceilings are
//! enforced by [`Part::read_limited`] and [`Part::save_to`], which fail with
//! [`Error::FileTooLarge`] rather than truncating.

use crate::request::BodyReader;
use crate::{Error, Request, Result};
use memchr::memmem;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

/// Ceiling for one part's header block
pub const MAX_PART_HEADER_SIZE: usize = 8 * 1024;

const CHUNK: usize = 8 * 1024;

/// Extract the boundary from a `multipart/form-data` Content-Type
pub fn parse_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }

    params.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Inside a part body, or the preamble
    Body,
    /// Just past a delimiter
    Boundary,
    /// Closing delimiter seen
    Done,
}

/// Multipart body reader
pub struct Multipart<R> {
    reader: R,
    /// `CRLF -- boundary`
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    eof: bool,
    state: State,
}

impl<'a> Multipart<BodyReader<'a>> {
    /// Read the multipart body of `req`
    pub fn from_request(req: &Request<'a>) -> Result<Self> {
        let boundary = req
            .content_type()
            .and_then(parse_boundary)
            .ok_or_else(|| Error::Multipart("missing multipart boundary".to_string()))?;
        Ok(Self::new(req.body(), &boundary))
    }
}

impl<R: Read> Multipart<R> {
    pub fn new(reader: R, boundary: &str) -> Self {
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());

        Self {
            reader,
            delimiter,
            // The first delimiter has no leading CRLF; supply one so the
            // preamble is skipped like any other body
            buf: b"\r\n".to_vec(),
            eof: false,
            state: State::Body,
        }
    }

    /// Advance to the next part
    ///
    /// Unread content of the previous part is discarded. Returns `None` after
    /// the closing delimiter.
    pub fn next_part(&mut self) -> Result<Option<Part<'_, R>>> {
        let mut sink = [0u8; CHUNK];
        while self.state == State::Body {
            self.read_body(&mut sink)?;
        }
        if self.state == State::Done {
            return Ok(None);
        }

        self.fill_to(2)?;
        if self.buf.starts_with(b"--") {
            self.state = State::Done;
            return Ok(None);
        }

        let (name, filename, content_type) = self.read_part_headers()?;
        self.state = State::Body;

        Ok(Some(Part {
            multipart: self,
            name,
            filename,
            content_type,
        }))
    }

    fn read_part_headers(&mut self) -> Result<(String, Option<String>, Option<String>)> {
        let end = loop {
            if let Some(end) = memmem::find(&self.buf, b"\r\n\r\n") {
                break end;
            }
            if self.buf.len() > MAX_PART_HEADER_SIZE {
                return Err(Error::Multipart("part headers too large".to_string()));
            }
            if self.eof {
                return Err(Error::Multipart("unexpected end of part headers".to_string()));
            }
            self.fill()?;
        };
        if end > MAX_PART_HEADER_SIZE {
            return Err(Error::Multipart("part headers too large".to_string()));
        }

        // The delimiter line may carry trailing whitespace before its CRLF
        let line_end = memmem::find(&self.buf, b"\r\n").unwrap_or(end);
        if !self.buf[..line_end].iter().all(|b| *b == b' ' || *b == b'\t') {
            return Err(Error::Multipart("malformed delimiter line".to_string()));
        }

        let block = if end > line_end {
            std::str::from_utf8(&self.buf[line_end + 2..end])
                .map_err(|_| Error::Multipart("part headers are not UTF-8".to_string()))?
        } else {
            ""
        };

        let mut name = String::new();
        let mut filename = None;
        let mut content_type = None;
        for line in block.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.eq_ignore_ascii_case("content-disposition") {
                for (param, value) in disposition_params(value) {
                    if param.eq_ignore_ascii_case("name") {
                        name = value;
                    } else if param.eq_ignore_ascii_case("filename") {
                        filename = Some(value);
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }

        self.buf.drain(..end + 4);
        Ok((name, filename, content_type))
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; CHUNK];
        let n = loop {
            match self.reader.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.eof = true;
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn fill_to(&mut self, len: usize) -> Result<()> {
        while self.buf.len() < len {
            if self.eof {
                return Err(Error::Multipart("unexpected end of body".to_string()));
            }
            self.fill()?;
        }
        Ok(())
    }

    /// Copy body bytes of the current part; 0 once its delimiter is reached
    fn read_body(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.state != State::Body || out.is_empty() {
            return Ok(0);
        }

        loop {
            if let Some(idx) = memmem::find(&self.buf, &self.delimiter) {
                if idx == 0 {
                    self.buf.drain(..self.delimiter.len());
                    self.state = State::Boundary;
                    return Ok(0);
                }
                return Ok(self.take_buffered(idx, out));
            }

            // Hold back a tail that may be the start of a split delimiter
            let safe = self.buf.len().saturating_sub(self.delimiter.len() - 1);
            if safe > 0 {
                return Ok(self.take_buffered(safe, out));
            }
            if self.eof {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "multipart body ended before the closing boundary",
                ));
            }
            self.fill()?;
        }
    }

    fn take_buffered(&mut self, available: usize, out: &mut [u8]) -> usize {
        let n = available.min(out.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.drain(..n);
        n
    }
}

/// `name=value` pairs of a Content-Disposition value, quotes removed
fn disposition_params(value: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = value.chars().peekable();

    // Skip the disposition type
    for c in chars.by_ref() {
        if c == ';' {
            break;
        }
    }

    loop {
        let key: String = chars
            .by_ref()
            .skip_while(|c| c.is_whitespace() || *c == ';')
            .take_while(|c| *c != '=')
            .collect();
        if key.is_empty() {
            break;
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    c => value.push(c),
                }
            }
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
            }
        } else {
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
                value.push(c);
            }
        }

        params.push((key.trim().to_string(), value.trim().to_string()));
    }

    params
}

/// One part of a multipart body
///
/// Reading yields the part's content and stops at the next delimiter.
pub struct Part<'m, R> {
    multipart: &'m mut Multipart<R>,
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

impl<R: Read> Part<'_, R> {
    /// Form field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client file name, for file fields
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Read the remaining content, failing if it exceeds `limit` bytes
    pub fn read_limited(&mut self, limit: u64) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        let n = self
            .by_ref()
            .take(limit.saturating_add(1))
            .read_to_end(&mut content)?;
        if n as u64 > limit {
            return Err(Error::FileTooLarge { limit });
        }
        Ok(content)
    }

    /// Read the remaining content as UTF-8 text
    pub fn text(&mut self, limit: u64) -> Result<String> {
        String::from_utf8(self.read_limited(limit)?)
            .map_err(|_| Error::Multipart(format!("field {} is not UTF-8", self.name)))
    }

    /// Stream the remaining content into a new file at `path`
    ///
    /// Returns the number of bytes written. If the content exceeds `limit`
    /// the partial file is removed and `FileTooLarge` is returned.
    pub fn save_to(&mut self, path: impl AsRef<Path>, limit: u64) -> Result<u64> {
        let path = path.as_ref();
        let mut file = File::create(path)?;

        let mut limited = self.by_ref().take(limit.saturating_add(1));
        let copied = io::copy(&mut limited, &mut file);
        let result = match copied {
            Ok(n) if n > limit => Err(Error::FileTooLarge { limit }),
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        };

        if result.is_err() {
            drop(file);
            let _ = fs::remove_file(path);
        }
        result
    }
}

impl<R: Read> Read for Part<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.multipart.read_body(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;
    use bumpalo::Bump;

    const BOUNDARY: &str = "X-BOUNDARY";

    fn body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"preamble to ignore\r\n");
        body.extend_from_slice(b"--X-BOUNDARY\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"title\"\r\n\r\n");
        body.extend_from_slice(b"Hello world\r\n");
        body.extend_from_slice(b"--X-BOUNDARY\r\n");
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"upload\"; filename=\"a;b \\\"c\\\".txt\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
        body.extend_from_slice(b"line one\r\n--not the boundary\r\nline two");
        body.extend_from_slice(b"\r\n--X-BOUNDARY--\r\n");
        body
    }

    /// Yields at most `step` bytes per read
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(out.len()).min(self.data.len());
            out[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_parse_boundary() {
        assert_eq!(
            parse_boundary("multipart/form-data; boundary=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            parse_boundary("Multipart/Form-Data; charset=utf-8; Boundary=\"q x\"").as_deref(),
            Some("q x")
        );
        assert_eq!(parse_boundary("multipart/form-data"), None);
        assert_eq!(parse_boundary("text/plain; boundary=abc"), None);
    }

    #[test]
    fn test_reads_parts_in_order() {
        let data = body();
        let mut multipart = Multipart::new(&data[..], BOUNDARY);

        let mut part = multipart.next_part().unwrap().unwrap();
        assert_eq!(part.name(), "title");
        assert_eq!(part.filename(), None);
        assert_eq!(part.text(1024).unwrap(), "Hello world");

        let mut part = multipart.next_part().unwrap().unwrap();
        assert_eq!(part.name(), "upload");
        assert_eq!(part.filename(), Some("a;b \"c\".txt"));
        assert_eq!(part.content_type(), Some("text/plain"));
        assert_eq!(
            part.read_limited(1024).unwrap(),
            b"line one\r\n--not the boundary\r\nline two"
        );

        assert!(multipart.next_part().unwrap().is_none());
        assert!(multipart.next_part().unwrap().is_none());
    }

    #[test]
    fn test_tiny_reads_across_delimiters() {
        let data = body();
        for step in [1, 2, 3, 7] {
            let reader = Trickle { data: &data, step };
            let mut multipart = Multipart::new(reader, BOUNDARY);

            let mut names = Vec::new();
            let mut contents = Vec::new();
            while let Some(mut part) = multipart.next_part().unwrap() {
                names.push(part.name().to_string());
                contents.push(part.read_limited(1024).unwrap());
            }
            assert_eq!(names, ["title", "upload"]);
            assert_eq!(contents[0], b"Hello world");
            assert!(contents[1].ends_with(b"line two"));
        }
    }

    #[test]
    fn test_unread_part_is_skipped() {
        let data = body();
        let mut multipart = Multipart::new(&data[..], BOUNDARY);

        let part = multipart.next_part().unwrap().unwrap();
        assert_eq!(part.name(), "title");
        drop(part);

        let part = multipart.next_part().unwrap().unwrap();
        assert_eq!(part.name(), "upload");
    }

    #[test]
    fn test_read_limited_over_limit() {
        let data = body();
        let mut multipart = Multipart::new(&data[..], BOUNDARY);
        let mut part = multipart.next_part().unwrap().unwrap();

        let err = part.read_limited(5).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { limit: 5 }));
    }

    #[test]
    fn test_read_limited_at_limit() {
        let data = body();
        let mut multipart = Multipart::new(&data[..], BOUNDARY);
        let mut part = multipart.next_part().unwrap().unwrap();
        assert_eq!(part.read_limited(11).unwrap(), b"Hello world");
    }

    #[test]
    fn test_stream_then_read_limited() {
        let data = body();
        let mut multipart = Multipart::new(&data[..], BOUNDARY);
        let mut part = multipart.next_part().unwrap().unwrap();

        let mut prefix = [0u8; 6];
        part.read_exact(&mut prefix).unwrap();
        assert_eq!(&prefix, b"Hello ");
        assert_eq!(part.text(5).unwrap(), "world");

        let mut part = multipart.next_part().unwrap().unwrap();
        assert!(matches!(part.text(4), Err(Error::FileTooLarge { limit: 4 })));
    }

    #[test]
    fn test_save_to_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let data = body();

        let mut multipart = Multipart::new(&data[..], BOUNDARY);
        multipart.next_part().unwrap().unwrap();
        let mut part = multipart.next_part().unwrap().unwrap();
        let saved = dir.path().join("upload.txt");
        let written = part.save_to(&saved, 1024).unwrap();
        assert_eq!(written, 38);
        assert!(fs::read(&saved).unwrap().starts_with(b"line one"));

        let mut multipart = Multipart::new(&data[..], BOUNDARY);
        multipart.next_part().unwrap().unwrap();
        let mut part = multipart.next_part().unwrap().unwrap();
        let too_big = dir.path().join("too-big.txt");
        let err = part.save_to(&too_big, 10).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { limit: 10 }));
        assert!(!too_big.exists());
    }

    #[test]
    fn test_missing_closing_boundary() {
        let data = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue".to_vec();
        let mut multipart = Multipart::new(&data[..], BOUNDARY);
        let mut part = multipart.next_part().unwrap().unwrap();
        assert!(matches!(part.read_limited(1024), Err(Error::Io(_))));
    }

    #[test]
    fn test_oversized_part_headers() {
        let mut data = b"--X-BOUNDARY\r\nX-Filler: ".to_vec();
        data.extend(std::iter::repeat(b'a').take(MAX_PART_HEADER_SIZE + 16));
        data.extend_from_slice(b"\r\n\r\nvalue\r\n--X-BOUNDARY--\r\n");

        let mut multipart = Multipart::new(&data[..], BOUNDARY);
        assert!(matches!(multipart.next_part(), Err(Error::Multipart(_))));
    }

    #[test]
    fn test_from_request() {
        let data = body();
        let arena = Bump::new();
        let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);
        let req = Request::builder(&arena, Method::Post, "/upload")
            .header("Content-Type", &content_type)
            .body(&data)
            .build();

        let mut multipart = Multipart::from_request(&req).unwrap();
        let mut part = multipart.next_part().unwrap().unwrap();
        assert_eq!(part.text(64).unwrap(), "Hello world");

        let plain = Request::builder(&arena, Method::Post, "/upload")
            .header("Content-Type", "text/plain")
            .build();
        assert!(matches!(
            Multipart::from_request(&plain),
            Err(Error::Multipart(_))
        ));
    }
}
