use crate::sniproxy::route::parser::{ParseOutcome, Parser};

/// Extracts the `server_name` extension from a TLS ClientHello record.
///
/// Walks the TLS record header, handshake header, client version, client random, session id,
/// cipher suites, compression methods and extensions block by hand -- this is wire-format
/// parsing, not a TLS handshake, so it never needs a full TLS stack.
pub struct SniParser;

/// Minimum bytes needed before we can even tell this is a ClientHello: record header (5) +
/// handshake header (4) + client version (2) + client random (32) + session id length (1).
const MIN_PREFIX: usize = 5 + 4 + 2 + 32 + 1;

impl Parser for SniParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        if buf.is_empty() {
            return ParseOutcome::NeedMore;
        }
        if buf[0] != 0x16 {
            return ParseOutcome::Malformed("not a TLS handshake record");
        }
        if buf.len() < MIN_PREFIX {
            return ParseOutcome::NeedMore;
        }

        let mut pos = 5; // TLS record header: type(1) + version(2) + length(2)

        // handshake type(1) + length(3)
        pos += 4;
        // client version
        pos += 2;
        // client random
        pos += 32;

        macro_rules! need {
            ($n:expr) => {
                if pos + $n > buf.len() {
                    return ParseOutcome::NeedMore;
                }
            };
        }

        need!(1);
        let session_id_len = buf[pos] as usize;
        pos += 1;
        need!(session_id_len);
        pos += session_id_len;

        need!(2);
        let cipher_suites_len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
        pos += 2;
        need!(cipher_suites_len);
        pos += cipher_suites_len;

        need!(1);
        let compression_len = buf[pos] as usize;
        pos += 1;
        need!(compression_len);
        pos += compression_len;

        need!(2);
        let extensions_len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as usize;
        pos += 2;
        need!(extensions_len);

        let extensions_end = pos + extensions_len;
        // From here on every length we read must fit inside the (now fully present)
        // extensions block -- a length that doesn't is a malformed ClientHello, not a
        // truncated one, because we already know the whole extensions block arrived.
        while pos + 4 <= extensions_end {
            let ext_type = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
            let ext_len = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
            pos += 4;

            if pos + ext_len > extensions_end {
                return ParseOutcome::Malformed("extension length overruns extensions block");
            }

            if ext_type == 0 {
                return parse_server_name_extension(&buf[pos..pos + ext_len]);
            }

            pos += ext_len;
        }

        ParseOutcome::NoHostname
    }
}

fn parse_server_name_extension(ext: &[u8]) -> ParseOutcome {
    if ext.len() < 2 {
        return ParseOutcome::Malformed("server_name extension too short");
    }
    let list_len = u16::from_be_bytes([ext[0], ext[1]]) as usize;
    if 2 + list_len > ext.len() {
        return ParseOutcome::Malformed("server_name list length overruns extension");
    }
    let list = &ext[2..2 + list_len];
    if list.len() < 3 {
        return ParseOutcome::NoHostname;
    }
    let name_type = list[0];
    if name_type != 0 {
        // Only the "host_name" SNI entry type is defined; anything else we don't understand.
        return ParseOutcome::NoHostname;
    }
    let name_len = u16::from_be_bytes([list[1], list[2]]) as usize;
    if 3 + name_len > list.len() {
        return ParseOutcome::Malformed("hostname length overruns server_name list");
    }
    match std::str::from_utf8(&list[3..3 + name_len]) {
        Ok(s) if !s.is_empty() => ParseOutcome::Hostname(s.to_string()),
        _ => ParseOutcome::NoHostname,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_client_hello(sni: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // client version
        body.extend_from_slice(&[0u8; 32]); // client random
        body.push(0); // session id len
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // one cipher suite
        body.push(1); // compression methods len
        body.push(0); // null compression

        let mut extensions = Vec::new();
        if let Some(host) = sni {
            let mut server_name_list = Vec::new();
            server_name_list.push(0u8); // host_name type
            server_name_list.extend_from_slice(&(host.len() as u16).to_be_bytes());
            server_name_list.extend_from_slice(host.as_bytes());

            let mut ext = Vec::new();
            ext.extend_from_slice(&(server_name_list.len() as u16).to_be_bytes());
            ext.extend_from_slice(&server_name_list);

            extensions.extend_from_slice(&[0x00, 0x00]); // extension type = server_name
            extensions.extend_from_slice(&(ext.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&ext);
        }
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = Vec::new();
        handshake.push(0x01); // ClientHello
        let len = body.len() as u32;
        handshake.extend_from_slice(&len.to_be_bytes()[1..]); // 3-byte length
        handshake.extend_from_slice(&body);

        let mut record = Vec::new();
        record.push(0x16); // handshake
        record.extend_from_slice(&[0x03, 0x01]); // record version
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn extracts_sni_hostname() {
        let hello = build_client_hello(Some("example.com"));
        match SniParser.parse(&hello) {
            ParseOutcome::Hostname(h) => assert_eq!(h, "example.com"),
            other => panic!("expected Hostname, got {:?}", other),
        }
    }

    #[test]
    fn truncated_hello_needs_more() {
        let hello = build_client_hello(Some("example.com"));
        let truncated = &hello[..hello.len() - 5];
        assert_eq!(SniParser.parse(truncated), ParseOutcome::NeedMore);
    }

    #[test]
    fn no_sni_extension() {
        let hello = build_client_hello(None);
        assert_eq!(SniParser.parse(&hello), ParseOutcome::NoHostname);
    }

    #[test]
    fn not_tls_is_malformed() {
        assert_eq!(SniParser.parse(b"GET / HTTP/1.1\r\n"), ParseOutcome::Malformed("not a TLS handshake record"));
    }
}
