use crate::sniproxy::route::http::HostParser;
use crate::sniproxy::route::parser::{ParseOutcome, Parser};
use crate::sniproxy::route::sni::SniParser;

/// Looks at the first byte to decide which concrete parser to delegate to: `0x16` is a TLS
/// handshake record, anything that looks like the start of an HTTP request line is plain
/// HTTP, anything else isn't a protocol this proxy understands.
pub struct SniffParser;

const HTTP_METHODS: &[&[u8]] = &[
    b"GET ", b"POST ", b"PUT ", b"PATCH ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"CONNECT ", b"TRACE ",
];

impl Parser for SniffParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        if buf.is_empty() {
            return ParseOutcome::NeedMore;
        }
        if buf[0] == 0x16 {
            return SniParser.parse(buf);
        }
        if looks_like_http(buf) {
            return HostParser.parse(buf);
        }
        if could_still_become_http(buf) {
            return ParseOutcome::NeedMore;
        }
        ParseOutcome::Malformed("neither a TLS ClientHello nor an HTTP request")
    }
}

fn looks_like_http(buf: &[u8]) -> bool {
    HTTP_METHODS.iter().any(|m| buf.len() >= m.len() && buf.starts_with(m))
}

fn could_still_become_http(buf: &[u8]) -> bool {
    HTTP_METHODS.iter().any(|m| buf.len() < m.len() && m.starts_with(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_tls_to_sni_parser() {
        // truncated TLS record; SniParser will report NeedMore, proving dispatch happened
        assert_eq!(SniffParser.parse(&[0x16, 0x03, 0x01]), ParseOutcome::NeedMore);
    }

    #[test]
    fn routes_http_to_host_parser() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(SniffParser.parse(req), ParseOutcome::Hostname("example.com".to_string()));
    }

    #[test]
    fn garbage_is_malformed() {
        assert_eq!(SniffParser.parse(b"\x00\x01\x02\x03"), ParseOutcome::Malformed("neither a TLS ClientHello nor an HTTP request"));
    }

    #[test]
    fn partial_method_needs_more() {
        assert_eq!(SniffParser.parse(b"GE"), ParseOutcome::NeedMore);
    }
}
