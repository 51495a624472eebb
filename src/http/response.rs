//! Responses the proxy writes itself.
//!
//! Only two are ever produced: the CONNECT acknowledgement and a minimal
//! `400 Bad Request` page for anything that cannot be routed.

const BAD_REQUEST_BODY: &str = concat!(
    "<html>",
    "<head><title>400 Bad Request</title></head>",
    "<body><center>",
    "<h1>400 Bad Request</h1>",
    "<p>The proxy server could not understand the HTTP request.</p>",
    "<p>Please contact your network administrator about this problem.</p>",
    "</center></body>",
    "</html>",
);

/// The synthesized 400 page, status line and headers included.
pub fn bad_request() -> Vec<u8> {
    format!(
        "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        BAD_REQUEST_BODY.len(),
        BAD_REQUEST_BODY
    )
    .into_bytes()
}

/// Acknowledgement for a CONNECT tunnel, echoing the client's HTTP version.
pub fn connection_established(version: &str, agent_name: &str) -> Vec<u8> {
    format!("{version} 200 Connection established\r\nProxy-Agent: {agent_name}\r\n\r\n").into_bytes()
}
