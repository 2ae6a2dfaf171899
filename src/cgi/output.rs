use crate::http::response::{Response, StatusCode, SERVER_NAME};

/// Turns raw CGI stdout (header block, blank line, body) into a response.
///
/// A `Status: NNN reason` header sets the status line; a `Location` header
/// without one means 302. Output with no blank line after the headers is
/// a broken script and yields 500.
pub fn translate(output: &[u8]) -> Response {
    let Some((head_end, body_start)) = find_head_end(output) else {
        tracing::warn!(bytes = output.len(), "CGI output has no header terminator");
        return Response::internal_error();
    };

    let head = String::from_utf8_lossy(&output[..head_end]);
    let mut response = Response::new();

    for line in head.lines() {
        let line = line.trim_end_matches('\r');
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());

        if name.eq_ignore_ascii_case("Status") {
            let (code, reason) = value.split_once(' ').unwrap_or((value, ""));
            match code.parse::<u16>() {
                Ok(code) => {
                    response.set_status(StatusCode::from_u16(code));
                    if !reason.trim().is_empty() {
                        response.reason = Some(reason.trim().to_string());
                    }
                }
                Err(_) => tracing::warn!(status = value, "Ignoring malformed CGI Status header"),
            }
        } else {
            response.add_header(name, value);
        }
    }

    if response.status.is_none() && response.headers.contains("Location") {
        response.set_status(StatusCode::Found);
    }

    response.add_header("Connection", "close");
    if !response.headers.contains("Server") {
        response.add_header("Server", SERVER_NAME);
    }
    response.body = output[body_start..].to_vec();
    response
}

/// Offset where the header block ends and where the body starts.
///
/// The block ends at the first line that is empty once its `\r` is dropped,
/// so `\n`, `\r\n` and mixed terminators are all accepted.
fn find_head_end(output: &[u8]) -> Option<(usize, usize)> {
    let mut offset = 0;
    for line in output.split_inclusive(|&b| b == b'\n') {
        let start = offset;
        offset += line.len();
        if !line.ends_with(b"\n") {
            return None;
        }
        let content = line.strip_suffix(b"\n").unwrap_or(line);
        if content.strip_suffix(b"\r").unwrap_or(content).is_empty() {
            return Some((start, offset));
        }
    }
    None
}
