use crate::http::headers::HeaderMap;

/// HTTP request methods.
///
/// The server serves files for GET and HEAD, runs CGI scripts for GET, HEAD
/// and POST, and forwards anything to a proxied upstream. Other methods are
/// answered with 501 Not Implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Example
    ///
    /// ```
    /// # use lantern::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

/// A request as received from a client.
///
/// `path`, `filename` and `query` are derived from `uri` whenever it is set.
/// Missing request-line tokens are kept as empty strings.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Method token, verbatim (e.g. "GET")
    pub method: String,
    /// Request target as sent (e.g. "/search?q=rust")
    pub uri: String,
    /// HTTP version token (e.g. "HTTP/1.0")
    pub version: String,
    pub headers: HeaderMap,
    /// URI without the query string and without one trailing '/'
    pub path: String,
    /// Last '/'-delimited segment of `path`
    pub filename: String,
    /// Everything after the first '?', empty if none
    pub query: String,
    pub body: Vec<u8>,
    head: Vec<u8>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a request line into method, URI and version.
    pub fn set_request_line(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        self.method = parts.next().unwrap_or_default().to_string();
        let uri = parts.next().unwrap_or_default().to_string();
        self.version = parts.next().unwrap_or_default().to_string();
        self.set_uri(uri);
    }

    /// Sets the URI and re-derives path, filename and query string.
    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = uri.into();

        let (path, query) = match self.uri.split_once('?') {
            Some((p, q)) => (p, q),
            None => (self.uri.as_str(), ""),
        };
        let path = path.strip_suffix('/').unwrap_or(path);

        self.filename = path.rsplit('/').next().unwrap_or_default().to_string();
        self.path = path.to_string();
        self.query = query.to_string();
    }

    /// The parsed method, if it is one the server knows.
    pub fn method(&self) -> Option<Method> {
        Method::from_str(&self.method)
    }

    pub fn is_head(&self) -> bool {
        self.method() == Some(Method::HEAD)
    }

    /// Retrieves a header value by name, case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Retrieves the Content-Length header value and parses it as a usize.
    ///
    /// Returns 0 if the header is missing or not a valid number.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn host(&self) -> Option<&str> {
        self.header("Host")
    }

    /// The request line as received, without terminator.
    pub fn request_line(&self) -> String {
        format!("{} {} {}", self.method, self.uri, self.version)
    }

    /// Regenerates a canonical head from the structured fields.
    ///
    /// Content-Length is rewritten to match the body when there is one.
    pub fn finalize(&mut self) {
        if !self.body.is_empty() {
            self.headers
                .insert("Content-Length", self.body.len().to_string());
        }

        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(self.request_line().as_bytes());
        head.extend_from_slice(b"\r\n");
        self.headers.write_to(&mut head);
        head.extend_from_slice(b"\r\n");
        self.head = head;
    }

    /// Head produced by the last [`finalize`](Request::finalize); empty before.
    pub fn head(&self) -> &[u8] {
        &self.head
    }
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: String,
    uri: String,
    version: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: String::new(),
            uri: String::new(),
            version: "HTTP/1.0".to_string(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method.as_str().to_string();
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Request {
        let mut request = Request {
            method: self.method,
            version: self.version,
            headers: self.headers,
            body: self.body,
            ..Request::default()
        };
        request.set_uri(self.uri);
        request
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
