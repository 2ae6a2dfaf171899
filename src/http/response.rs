use crate::http::headers::HeaderMap;

/// Version written on the status line when none was set.
pub const DEFAULT_VERSION: &str = "HTTP/1.0";

/// Value of the `Server` header on responses the server generates itself.
pub const SERVER_NAME: &str = concat!("lantern/", env!("CARGO_PKG_VERSION"));

/// HTTP status codes.
///
/// Common HTTP status codes used in responses:
/// - `Ok` (200): Request successful
/// - `Found` (302): CGI redirect
/// - `BadRequest` (400): Malformed or oversized request head
/// - `NotFound` (404): No route, no file, or a path outside its sandbox
/// - `PayloadTooLarge` (413): Declared body over the configured limit
/// - `InternalServerError` (500): CGI spawn or upstream connect failure
/// - `NotImplemented` (501): Unsupported method
///
/// Anything else, typically from a CGI `Status:` header, is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 302 Found
    Found,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 502 Bad Gateway
    BadGateway,
    Other(u16),
}

impl StatusCode {
    pub fn from_u16(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            204 => StatusCode::NoContent,
            302 => StatusCode::Found,
            400 => StatusCode::BadRequest,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            413 => StatusCode::PayloadTooLarge,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            502 => StatusCode::BadGateway,
            other => StatusCode::Other(other),
        }
    }

    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use lantern::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::Found => 302,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::BadGateway => 502,
            StatusCode::Other(code) => *code,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// Codes without a known phrase return an empty string.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::Found => "Found",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::Other(_) => "",
        }
    }
}

/// A response under construction.
///
/// Status and version may stay unset until [`finalize`](Response::finalize),
/// which fills in defaults, computes Content-Length from the body and
/// serializes the head.
#[derive(Debug, Default)]
pub struct Response {
    pub status: Option<StatusCode>,
    /// Overrides the standard reason phrase (e.g. from a CGI `Status:` line)
    pub reason: Option<String>,
    pub version: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    head: Vec<u8>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a header.
    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key, value);
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Status code after defaults are applied.
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(StatusCode::Ok).as_u16()
    }

    /// Serializes status line, headers, Content-Length and the blank line
    /// into the head buffer.
    pub fn finalize(&mut self) {
        let status = *self.status.get_or_insert(StatusCode::Ok);
        let version = self
            .version
            .get_or_insert_with(|| DEFAULT_VERSION.to_string());
        let reason = self
            .reason
            .as_deref()
            .unwrap_or_else(|| status.reason_phrase());

        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(format!("{} {} {}\r\n", version, status.as_u16(), reason).as_bytes());

        self.headers.remove("Content-Length");
        self.headers.write_to(&mut head);
        head.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        head.extend_from_slice(b"\r\n");

        self.head = head;
    }

    /// Head produced by the last finalize; empty before.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Drops the body while keeping the finalized head, for HEAD requests.
    pub fn strip_body(&mut self) {
        self.body.clear();
    }

    /// Moves head and body out for transmission, leaving status and headers.
    pub fn take_wire(&mut self) -> (Vec<u8>, Vec<u8>) {
        (
            std::mem::take(&mut self.head),
            std::mem::take(&mut self.body),
        )
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok).body(body.into()).build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        Self::error(StatusCode::NotFound)
    }

    /// Creates a 500 Internal Server Error response.
    pub fn internal_error() -> Self {
        Self::error(StatusCode::InternalServerError)
    }

    /// Creates a plain-text error page such as "404 Not Found".
    pub fn error(status: StatusCode) -> Self {
        let body = format!("{} {}\n", status.as_u16(), status.reason_phrase());
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .header("Connection", "close")
            .header("Server", SERVER_NAME)
            .body(body.into_bytes())
            .build()
    }
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Builds the Response. Content-Length is computed later, by finalize.
    pub fn build(self) -> Response {
        Response {
            status: Some(self.status),
            headers: self.headers,
            body: self.body,
            ..Response::default()
        }
    }
}
