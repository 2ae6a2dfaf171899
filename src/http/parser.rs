use crate::http::request::Request;
use crate::http::response::StatusCode;

/// Where the parser is in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Accepting request-line and header lines.
    Head,
    /// Blank line seen; accepting raw body bytes.
    HeadComplete,
    /// Terminal: the body reached the declared Content-Length.
    BodyComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The head grew past the configured limit.
    HeadTooLarge,
    /// Content-Length declares more than the configured limit.
    BodyTooLarge,
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::HeadTooLarge => StatusCode::BadRequest,
            ParseError::BodyTooLarge => StatusCode::PayloadTooLarge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Incremental request parser.
///
/// Head lines are fed one at a time with [`feed_line`](RequestParser::feed_line);
/// a line without a terminator is held back and joined with the next one.
/// After the blank line, body bytes are fed as raw chunks with
/// [`feed_body`](RequestParser::feed_body).
#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    request: Request,
    partial: Vec<u8>,
    seen_request_line: bool,
    head_bytes: usize,
    expected_body: usize,
    limits: ParserLimits,
}

impl RequestParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            state: ParseState::Head,
            request: Request::new(),
            partial: Vec::new(),
            seen_request_line: false,
            head_bytes: 0,
            expected_body: 0,
            limits,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_head_complete(&self) -> bool {
        self.state != ParseState::Head
    }

    pub fn is_body_complete(&self) -> bool {
        self.state == ParseState::BodyComplete
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn expected_body(&self) -> usize {
        self.expected_body
    }

    /// Body bytes still missing.
    pub fn remaining_body(&self) -> usize {
        self.expected_body.saturating_sub(self.request.body.len())
    }

    /// Feeds one head line (or a fragment of one).
    ///
    /// Lines fed after the head is complete are treated as body bytes.
    pub fn feed_line(&mut self, line: &[u8]) -> Result<ParseState, ParseError> {
        if self.state != ParseState::Head {
            return Ok(self.feed_body(line));
        }

        self.head_bytes += line.len();
        if self.head_bytes > self.limits.max_head_bytes {
            return Err(ParseError::HeadTooLarge);
        }

        if !line.ends_with(b"\n") {
            self.partial.extend_from_slice(line);
            return Ok(self.state);
        }

        let full;
        let line = if self.partial.is_empty() {
            line
        } else {
            self.partial.extend_from_slice(line);
            full = std::mem::take(&mut self.partial);
            &full[..]
        };

        let text = String::from_utf8_lossy(trim_terminator(line));

        if !self.seen_request_line {
            self.seen_request_line = true;
            self.request.set_request_line(&text);
            return Ok(self.state);
        }

        if text.is_empty() {
            self.state = ParseState::HeadComplete;
            self.check_body_complete();
            return Ok(self.state);
        }

        self.header_line(&text)?;
        Ok(self.state)
    }

    /// Appends raw body bytes, never past the declared Content-Length.
    pub fn feed_body(&mut self, chunk: &[u8]) -> ParseState {
        if self.state != ParseState::HeadComplete {
            return self.state;
        }

        let take = chunk.len().min(self.remaining_body());
        self.request.body.extend_from_slice(&chunk[..take]);
        self.check_body_complete();
        self.state
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    fn header_line(&mut self, text: &str) -> Result<(), ParseError> {
        let (name, value) = match text.split_once(':') {
            Some((name, value)) => (name, value.trim_start()),
            None => (text, ""),
        };

        if name.eq_ignore_ascii_case("Content-Length") {
            self.expected_body = value.trim().parse().unwrap_or(0);
            if self.expected_body > self.limits.max_body_bytes {
                return Err(ParseError::BodyTooLarge);
            }
        }

        self.request.headers.insert(name, value);
        Ok(())
    }

    fn check_body_complete(&mut self) {
        if self.state == ParseState::HeadComplete && self.request.body.len() >= self.expected_body {
            self.state = ParseState::BodyComplete;
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(ParserLimits::default())
    }
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
