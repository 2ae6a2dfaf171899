use lantern::http::request::{Method, Request, RequestBuilder};

#[test]
fn test_request_header_retrieval() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .uri("/")
        .header("Host", "example.com")
        .header("Content-Type", "application/json")
        .build();

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
    assert_eq!(req.host(), Some("example.com"));
}

#[test]
fn test_request_content_length_parsing() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .uri("/api")
        .header("Content-Length", "42")
        .build();

    assert_eq!(req.content_length(), 42);
}

#[test]
fn test_request_content_length_missing_or_invalid() {
    let missing = RequestBuilder::new().uri("/").build();
    assert_eq!(missing.content_length(), 0);

    let invalid = RequestBuilder::new()
        .uri("/")
        .header("Content-Length", "not-a-number")
        .build();
    assert_eq!(invalid.content_length(), 0);
}

#[test]
fn test_uri_derives_path_filename_and_query() {
    let mut req = Request::new();
    req.set_uri("/docs/guide/intro.html?lang=en&x=1");

    assert_eq!(req.path, "/docs/guide/intro.html");
    assert_eq!(req.filename, "intro.html");
    assert_eq!(req.query, "lang=en&x=1");
}

#[test]
fn test_uri_strips_one_trailing_slash() {
    let mut req = Request::new();
    req.set_uri("/docs/");
    assert_eq!(req.path, "/docs");
    assert_eq!(req.filename, "docs");

    req.set_uri("/");
    assert_eq!(req.path, "");
    assert_eq!(req.filename, "");

    req.set_uri("/a//");
    assert_eq!(req.path, "/a/");
    assert_eq!(req.filename, "");
}

#[test]
fn test_query_split_on_first_question_mark() {
    let mut req = Request::new();
    req.set_uri("/cgi-bin/run.sh?a=1?b=2");

    assert_eq!(req.path, "/cgi-bin/run.sh");
    assert_eq!(req.query, "a=1?b=2");
}

#[test]
fn test_request_line_tokens() {
    let mut req = Request::new();
    req.set_request_line("DELETE /item/7 HTTP/1.0");

    assert_eq!(req.method(), Some(Method::DELETE));
    assert_eq!(req.request_line(), "DELETE /item/7 HTTP/1.0");
    assert!(!req.is_head());
}

#[test]
fn test_unknown_method_is_kept_verbatim() {
    let mut req = Request::new();
    req.set_request_line("BREW /pot HTTP/1.0");

    assert_eq!(req.method, "BREW");
    assert_eq!(req.method(), None);
}

#[test]
fn test_finalize_regenerates_head_with_body_length() {
    let mut req = RequestBuilder::new()
        .method(Method::POST)
        .uri("/submit?x=1")
        .header("Host", "upstream")
        .header("Content-Length", "999")
        .body(b"hello".to_vec())
        .build();

    assert!(req.head().is_empty());
    req.finalize();

    let head = String::from_utf8(req.head().to_vec()).unwrap();
    assert!(head.starts_with("POST /submit?x=1 HTTP/1.0\r\n"));
    assert!(head.contains("Host: upstream\r\n"));
    assert!(head.contains("Content-Length: 5\r\n"));
    assert!(head.ends_with("\r\n\r\n"));
}

#[test]
fn test_method_from_str() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("HEAD"), Some(Method::HEAD));
    assert_eq!(Method::from_str("PATCH"), Some(Method::PATCH));
    assert_eq!(Method::from_str("get"), None);
    assert_eq!(Method::from_str(""), None);
    assert_eq!(Method::POST.as_str(), "POST");
}
