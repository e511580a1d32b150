use crate::sniproxy::route::parser::{ParseOutcome, Parser};

/// Extracts the value of the `Host:` header from the start of an HTTP/1.1 request.
pub struct HostParser;

impl Parser for HostParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        // The header block ends at the first blank line; until we've seen one, more bytes
        // might still turn up with the Host header in them.
        let headers_end = find_subslice(buf, b"\r\n\r\n")
            .or_else(|| find_subslice(buf, b"\n\n"));

        if let Some(host) = scan_for_host(buf) {
            return match std::str::from_utf8(host) {
                Ok(s) if !s.is_empty() => ParseOutcome::Hostname(s.to_string()),
                _ => ParseOutcome::NoHostname,
            };
        }

        match headers_end {
            Some(_) => ParseOutcome::NoHostname,
            None => ParseOutcome::NeedMore,
        }
    }
}

fn scan_for_host(buf: &[u8]) -> Option<&[u8]> {
    let max_scan = buf.len().min(8192);
    let pattern = b"host:";
    if max_scan < pattern.len() {
        return None;
    }
    let mut i = 0;
    while i + pattern.len() <= max_scan {
        if buf[i..i + pattern.len()].eq_ignore_ascii_case(pattern) {
            // must be at the start of a line: first header, or preceded by a newline
            if i == 0 || buf[i - 1] == b'\n' {
                let start = i + pattern.len();
                let mut end = start;
                while end < buf.len() && buf[end] != b'\r' && buf[end] != b'\n' {
                    end += 1;
                }
                if end >= buf.len() {
                    // the Host: line itself hasn't terminated yet -- caller treats this
                    // as "no Host found in the complete headers we have", which is
                    // correct only once headers_end is known; otherwise it's NeedMore,
                    // handled by the headers_end check in parse().
                    return None;
                }
                let trimmed = trim_ascii_whitespace(&buf[start..end]);
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
        }
        i += 1;
    }
    None
}

fn trim_ascii_whitespace(mut b: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = b {
        if first.is_ascii_whitespace() {
            b = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = b {
        if last.is_ascii_whitespace() {
            b = rest;
        } else {
            break;
        }
    }
    b
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(haystack, needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_header() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\nUser-Agent: x\r\n\r\n";
        match HostParser.parse(req) {
            ParseOutcome::Hostname(h) => assert_eq!(h, "example.com"),
            other => panic!("expected Hostname, got {:?}", other),
        }
    }

    #[test]
    fn case_insensitive_and_no_leading_space() {
        let req = b"GET / HTTP/1.1\r\nhost:example.com\r\n\r\n";
        assert_eq!(HostParser.parse(req), ParseOutcome::Hostname("example.com".to_string()));
    }

    #[test]
    fn needs_more_without_terminating_newline() {
        let req = b"GET / HTTP/1.1\r\nHost: example.c";
        assert_eq!(HostParser.parse(req), ParseOutcome::NeedMore);
    }

    #[test]
    fn no_host_header_present() {
        let req = b"GET / HTTP/1.1\r\nUser-Agent: x\r\n\r\n";
        assert_eq!(HostParser.parse(req), ParseOutcome::NoHostname);
    }
}
