/// Outcome of feeding a peeked (not consumed) prefix of a client stream to a Parser.
/// See the peek-parse-dial handoff: the buffer is never mutated by a parse attempt, so
/// `NeedMore` just means "try again once more bytes have arrived".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Not enough bytes yet to tell; retry on the next readiness tick.
    NeedMore,
    /// A complete, well-formed message was seen but it carries no routing key.
    NoHostname,
    /// The peeked bytes aren't a protocol this proxy understands.
    Malformed(&'static str),
    /// A routing key (SNI hostname / HTTP Host) was extracted.
    Hostname(String),
}

/// A Parser inspects the peeked prefix of a client connection and extracts a routing key
/// without consuming any bytes, so whatever it reads is later replayed verbatim to the
/// backend by the ordinary client->server relay.
pub trait Parser: Send + Sync {
    fn parse(&self, peeked: &[u8]) -> ParseOutcome;
}
