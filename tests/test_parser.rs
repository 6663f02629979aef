use weir::http::parser::{ParseError, ParserState, RequestParser};
use weir::http::request::{ConnectionType, Method, Request};

/// Feeds `input` in chunks of `chunk` bytes the way a connection does:
/// unconsumed bytes stay buffered and are offered again with the next chunk.
fn feed_in_chunks(input: &[u8], chunk: usize) -> Result<Vec<Request>, ParseError> {
    let mut parser = RequestParser::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut requests = Vec::new();

    for piece in input.chunks(chunk) {
        pending.extend_from_slice(piece);
        loop {
            let parsed = parser.parse(&pending)?;
            pending.drain(..parsed.consumed);
            match parsed.request {
                Some(request) => requests.push(request),
                None => break,
            }
        }
    }

    Ok(requests)
}

fn parse_one(input: &[u8]) -> Result<Request, ParseError> {
    let mut parser = RequestParser::new();
    let parsed = parser.parse(input)?;
    assert_eq!(parsed.consumed, input.len(), "request should be fully consumed");
    Ok(parsed.request.expect("request should be complete"))
}

#[test]
fn test_parse_simple_get_request() {
    let req = parse_one(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();

    assert_eq!(req.method, Method::GET);
    assert_eq!(req.path, "/");
    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.header("Host"), Some("example.com"));
}

#[test]
fn test_parse_path_query_and_host() {
    let req = parse_one(b"GET /a/b?x=1&y=2 HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();

    assert_eq!(req.method, Method::GET);
    assert_eq!(req.uri_path, "/a/b?x=1&y=2");
    assert_eq!(req.path, "/a/b");
    assert_eq!(req.query.get("x"), Some("1"));
    assert_eq!(req.query.get("y"), Some("2"));
    assert_eq!(req.query.len(), 2);
    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.header("host"), Some("h"));

    let uri = req.uri.as_ref().expect("uri from Host header");
    assert_eq!(uri.as_str(), "http://h/a/b?x=1&y=2");
    assert_eq!(req.path_segments(), vec!["a", "b"]);
}

#[test]
fn test_parse_post_request_with_body() {
    let req =
        parse_one(b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello")
            .unwrap();

    assert_eq!(req.method, Method::POST);
    assert_eq!(req.path, "/api");
    assert_eq!(req.content_length, 5);
    assert_eq!(&req.body[..], b"hello");
}

#[test]
fn test_parse_multiple_headers() {
    let req = parse_one(
        b"GET /path HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test-client\r\nAccept: text/html, */*\r\n\r\n",
    )
    .unwrap();

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("User-Agent"), Some("test-client"));
    assert_eq!(req.accept_types, vec!["text/html", "*/*"]);
}

#[test]
fn test_duplicate_headers_are_kept_in_order() {
    let req = parse_one(b"GET / HTTP/1.1\r\nX-Tag: one\r\nx-tag: two\r\n\r\n").unwrap();

    let tags: Vec<&str> = req.headers.get_all("X-TAG").collect();
    assert_eq!(tags, vec!["one", "two"]);
    assert_eq!(req.header("x-tag"), Some("one"));
}

#[test]
fn test_folded_header_joined_with_single_space() {
    let req = parse_one(b"GET / HTTP/1.1\r\nX: a\r\n b\r\n\r\n").unwrap();

    assert_eq!(req.header("X"), Some("a b"));
}

#[test]
fn test_folded_header_with_tabs() {
    let req = parse_one(b"GET / HTTP/1.1\r\nX: a\r\n\t\tb\r\n c\r\nY: d\r\n\r\n").unwrap();

    assert_eq!(req.header("X"), Some("a b c"));
    assert_eq!(req.header("Y"), Some("d"));
}

#[test]
fn test_whitespace_before_colon_is_allowed() {
    let req = parse_one(b"GET / HTTP/1.1\r\nHost  :   example.com\r\n\r\n").unwrap();

    assert_eq!(req.header("Host"), Some("example.com"));
}

#[test]
fn test_method_is_uppercased() {
    let req = parse_one(b"get / HTTP/1.0\r\n\r\n").unwrap();

    assert_eq!(req.method, Method::GET);
    assert_eq!(req.version, "HTTP/1.0");
}

#[test]
fn test_extension_method() {
    let req = parse_one(b"PROPFIND /dav HTTP/1.1\r\n\r\n").unwrap();

    assert_eq!(req.method, Method::Extension("PROPFIND".to_string()));
    assert_eq!(req.method.as_str(), "PROPFIND");
}

#[test]
fn test_single_leading_crlf_is_ignored() {
    let req = parse_one(b"\r\nGET / HTTP/1.1\r\n\r\n").unwrap();

    assert_eq!(req.path, "/");
}

#[test]
fn test_connection_and_ajax_headers() {
    let req = parse_one(
        b"GET / HTTP/1.1\r\nConnection: close\r\nX-Requested-With: XMLHttpRequest\r\n\r\n",
    )
    .unwrap();

    assert_eq!(req.connection, Some(ConnectionType::Close));
    assert!(!req.keep_alive());
    assert!(req.is_ajax);
}

#[test]
fn test_keep_alive_defaults_by_version() {
    let http11 = parse_one(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    let http10 = parse_one(b"GET / HTTP/1.0\r\n\r\n").unwrap();
    let http10_keep =
        parse_one(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap();

    assert!(http11.keep_alive());
    assert!(!http10.keep_alive());
    assert!(http10_keep.keep_alive());
}

#[test]
fn test_asterisk_target_with_host() {
    let req = parse_one(b"OPTIONS * HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();

    assert_eq!(req.method, Method::OPTIONS);
    assert_eq!(req.uri.as_ref().map(|u| u.as_str()), Some("http://example.com/"));
}

#[test]
fn test_secure_parser_builds_https_uri() {
    let mut parser = RequestParser::new();
    parser.set_secure(true);

    let parsed = parser
        .parse(b"GET /x HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .unwrap();
    let req = parsed.request.unwrap();

    assert!(req.secure);
    assert_eq!(req.uri.unwrap().as_str(), "https://example.com/x");
}

#[test]
fn test_chunk_boundaries_do_not_change_the_result() {
    let input: &[u8] = b"POST /upload?name=a%20b HTTP/1.1\r\n\
Host: example.com\r\n\
X-Folded: first\r\n second\r\n\
Content-Length: 11\r\n\
\r\n\
hello world\
GET /next HTTP/1.1\r\n\
Host: example.com\r\n\
\r\n";

    let whole = feed_in_chunks(input, input.len()).unwrap();
    let bytewise = feed_in_chunks(input, 1).unwrap();
    let odd = feed_in_chunks(input, 7).unwrap();

    assert_eq!(whole.len(), 2);
    for split in [&bytewise, &odd] {
        assert_eq!(split.len(), whole.len());
        for (a, b) in whole.iter().zip(split.iter()) {
            assert_eq!(a.method, b.method);
            assert_eq!(a.uri_path, b.uri_path);
            assert_eq!(a.query, b.query);
            assert_eq!(a.body, b.body);
            let ha: Vec<_> = a.headers.iter().collect();
            let hb: Vec<_> = b.headers.iter().collect();
            assert_eq!(ha, hb);
        }
    }

    assert_eq!(whole[0].query.get("name"), Some("a b"));
    assert_eq!(whole[0].header("X-Folded"), Some("first second"));
    assert_eq!(&whole[0].body[..], b"hello world");
    assert_eq!(whole[1].path, "/next");
}

#[test]
fn test_body_split_across_reads() {
    let mut parser = RequestParser::new();

    let head = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhe";
    let parsed = parser.parse(head).unwrap();
    assert!(parsed.request.is_none());
    assert_eq!(parsed.consumed, head.len());
    assert_eq!(parser.current_state(), ParserState::Body);

    let parsed = parser.parse(b"llo").unwrap();
    assert_eq!(parsed.consumed, 3);
    let req = parsed.request.unwrap();
    assert_eq!(&req.body[..], b"hello");
    assert_eq!(parser.current_state(), ParserState::FirstLine);
}

#[test]
fn test_pipelined_requests_are_returned_one_per_call() {
    let input = b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n";
    let mut parser = RequestParser::new();

    let first = parser.parse(input).unwrap();
    assert_eq!(first.consumed, 21);
    assert_eq!(first.request.unwrap().path, "/one");

    let second = parser.parse(&input[first.consumed..]).unwrap();
    assert_eq!(second.consumed, input.len() - 21);
    assert_eq!(second.request.unwrap().path, "/two");
}

#[test]
fn test_incomplete_request_waits_for_more() {
    let mut parser = RequestParser::new();
    let parsed = parser.parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n").unwrap();

    assert!(parsed.request.is_none());
    // the last header line waits for one byte of lookahead
    assert_eq!(parsed.consumed, 16);
    assert_eq!(parser.current_state(), ParserState::HeaderName);
}

#[test]
fn test_missing_uri_is_malformed() {
    let err = parse_one(b"GET\r\n\r\n").unwrap_err();
    assert!(matches!(err, ParseError::MalformedRequestLine(_)));
}

#[test]
fn test_missing_version_is_malformed() {
    let err = parse_one(b"GET /\r\n\r\n").unwrap_err();
    assert!(matches!(err, ParseError::MalformedRequestLine(_)));
}

#[test]
fn test_bad_version_prefix_is_malformed() {
    let err = parse_one(b"GET / FTP/1.0\r\n\r\n").unwrap_err();
    assert!(matches!(err, ParseError::MalformedRequestLine(_)));
}

#[test]
fn test_invalid_method_token_is_malformed() {
    let err = parse_one(b"G(T / HTTP/1.1\r\n\r\n").unwrap_err();
    assert!(matches!(err, ParseError::MalformedRequestLine(_)));
}

#[test]
fn test_too_long_uri_is_malformed() {
    let uri = format!("/{}", "a".repeat(5000));
    let input = format!("GET {uri} HTTP/1.1\r\n\r\n");

    let err = RequestParser::new().parse(input.as_bytes()).unwrap_err();
    assert!(matches!(err, ParseError::MalformedRequestLine(_)));
}

#[test]
fn test_endless_request_line_is_rejected_before_crlf() {
    let input = format!("GET /{}", "a".repeat(5000));

    let err = RequestParser::new().parse(input.as_bytes()).unwrap_err();
    assert!(matches!(err, ParseError::MalformedRequestLine(_)));
}

#[test]
fn test_invalid_header_name_character() {
    let err = parse_one(b"GET / HTTP/1.1\r\nBad_Name: x\r\n\r\n").unwrap_err();
    assert!(matches!(err, ParseError::InvalidHeaderName(_)));
}

#[test]
fn test_header_without_colon() {
    let err = parse_one(b"GET / HTTP/1.1\r\nNoColon\r\n\r\n").unwrap_err();
    assert!(matches!(err, ParseError::InvalidHeaderName(_)));
}

#[test]
fn test_too_long_header_name() {
    let input = format!("GET / HTTP/1.1\r\n{}: x\r\n\r\n", "N".repeat(300));

    let err = RequestParser::new().parse(input.as_bytes()).unwrap_err();
    assert!(matches!(err, ParseError::InvalidHeaderName(_)));
}

#[test]
fn test_too_long_header_value() {
    let input = format!("GET / HTTP/1.1\r\nX: {}\r\n\r\n", "v".repeat(2000));

    let err = RequestParser::new().parse(input.as_bytes()).unwrap_err();
    assert!(matches!(err, ParseError::HeaderValueTooLong(_)));
}

#[test]
fn test_empty_header_value_is_kept() {
    let request =
        parse_one(b"GET / HTTP/1.1\r\nHost: h\r\nAccept-Encoding: \r\nX-Empty:\r\nAccept:\r\n\r\n")
            .unwrap();

    assert_eq!(request.header("Accept-Encoding"), Some(""));
    assert_eq!(request.header("x-empty"), Some(""));
    assert!(request.accept_types.is_empty());
}

#[test]
fn test_invalid_content_length() {
    let err = parse_one(b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n").unwrap_err();
    assert!(matches!(err, ParseError::BadHeaderValue(_)));
}

#[test]
fn test_unknown_connection_type() {
    let err = parse_one(b"GET / HTTP/1.1\r\nConnection: sometimes\r\n\r\n").unwrap_err();
    assert!(matches!(err, ParseError::BadHeaderValue(_)));
}

#[test]
fn test_bare_lf_is_invalid_line_break() {
    let err = RequestParser::new().parse(b"GET / HTTP/1.1\n\n").unwrap_err();
    assert!(matches!(err, ParseError::InvalidLineBreak(_)));
}

#[test]
fn test_header_block_over_limit() {
    let mut parser = RequestParser::with_max_header_bytes(64);
    let input = format!("GET / HTTP/1.1\r\nX-Long: {}\r\n\r\n", "v".repeat(80));

    let err = parser.parse(input.as_bytes()).unwrap_err();
    assert!(matches!(err, ParseError::RequestHeaderTooLarge(_)));
}

#[test]
fn test_continue_latch_fires_once() {
    let mut parser = RequestParser::new();
    parser
        .parse(b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 3\r\n\r\n")
        .unwrap();

    assert_eq!(parser.current_state(), ParserState::Body);
    assert!(parser.should_send_continue());
    assert!(!parser.should_send_continue());

    let parsed = parser.parse(b"abc").unwrap();
    assert_eq!(&parsed.request.unwrap().body[..], b"abc");
    assert!(!parser.should_send_continue());
}

#[test]
fn test_reset_drops_partial_request() {
    let mut parser = RequestParser::new();
    parser
        .parse(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
        .unwrap();
    assert_eq!(parser.current_state(), ParserState::Body);

    parser.reset();

    assert_eq!(parser.current_state(), ParserState::FirstLine);
    assert!(parser.current_request().headers.is_empty());
    let req = parser.parse(b"GET /fresh HTTP/1.1\r\n\r\n").unwrap().request.unwrap();
    assert_eq!(req.path, "/fresh");
    assert!(req.body.is_empty());
}

#[test]
fn test_error_messages_carry_detail() {
    let err = parse_one(b"GET\r\n\r\n").unwrap_err();
    assert!(err.to_string().starts_with("Invalid request line"));
}
