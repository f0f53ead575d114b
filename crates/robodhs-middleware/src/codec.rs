//! DCSS text-frame codec.
//!
//! The control system speaks newline-delimited text messages.  Each line
//! starts with a message tag (`stoh_start_operation`, `htos_log`, …) followed
//! by whitespace-separated words; a word wrapped in braces (`{on gonio}`) is a
//! single argument that may contain spaces.
//!
//! [`FrameCodec`] decodes a byte stream into [`Frame`] values and encodes
//! frames back into bytes.  It can be driven two ways:
//!
//! * [`FrameCodec::decode_chunk`] – push raw chunks and iterate over the
//!   frames each chunk completes.  Partial lines are retained between calls.
//! * [`tokio_util::codec::Decoder`] / [`Encoder`] – plug the codec into
//!   `FramedRead` / `FramedWrite` on a socket.
//!
//! # Error policy
//!
//! Recoverable problems (unknown tag, wrong arity, bad argument type) are
//! yielded as `Err` items and decoding continues with the next line.  Framing
//! corruption (over-long line, invalid UTF-8) is fatal: the byte stream is no
//! longer trustworthy and the session must be terminated.

use bytes::{BufMut, BytesMut};
use robodhs_types::{Direction, Frame, ProtocolError, Token, tags};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// Message delimiter.
pub const DELIMITER: u8 = b'\n';

/// Longest accepted line (excluding the delimiter).  A `robot_config probe`
/// carries ~300 words, far below this bound.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const EXCERPT_LEN: usize = 64;

/// Declared type of a positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Text,
    Integer,
    OneOf(&'static [&'static str]),
}

impl ArgKind {
    fn accepts(&self, value: &str) -> bool {
        match self {
            ArgKind::Text => true,
            ArgKind::Integer => value.parse::<i64>().is_ok(),
            ArgKind::OneOf(choices) => choices.contains(&value),
        }
    }
}

/// Schema of one message tag.
#[derive(Debug, Clone, Copy)]
pub struct MessageSchema {
    pub tag: &'static str,
    pub direction: Direction,
    /// Index (within the words after the tag) where the correlation token sits.
    pub token_at: Option<usize>,
    /// Required leading arguments.
    pub params: &'static [ArgKind],
    /// Kind of any further arguments; `None` forbids extra arguments.
    pub rest: Option<ArgKind>,
}

const COMPLETION_STATUS: ArgKind = ArgKind::OneOf(&["normal", "error", "aborted"]);
const STRING_STATUS: ArgKind = ArgKind::OneOf(&["normal", "error"]);
const LOG_LEVEL: ArgKind = ArgKind::OneOf(&["note", "warning", "error", "info"]);

/// Every message the bridge understands.
pub static SCHEMAS: &[MessageSchema] = &[
    MessageSchema {
        tag: tags::STOC_SEND_CLIENT_TYPE,
        direction: Direction::Inbound,
        token_at: None,
        params: &[],
        rest: None,
    },
    MessageSchema {
        tag: tags::STOH_REGISTER_OPERATION,
        direction: Direction::Inbound,
        token_at: None,
        params: &[ArgKind::Text],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::STOH_REGISTER_STRING,
        direction: Direction::Inbound,
        token_at: None,
        params: &[ArgKind::Text],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::STOH_START_OPERATION,
        direction: Direction::Inbound,
        token_at: Some(1),
        params: &[ArgKind::Text],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::STOH_ABORT_ALL,
        direction: Direction::Inbound,
        token_at: None,
        params: &[],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::STOH_HEARTBEAT,
        direction: Direction::Inbound,
        token_at: None,
        params: &[],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::HTOS_CLIENT_IS_HARDWARE,
        direction: Direction::Outbound,
        token_at: None,
        params: &[ArgKind::Text],
        rest: None,
    },
    MessageSchema {
        tag: tags::HTOS_OPERATION_COMPLETED,
        direction: Direction::Outbound,
        token_at: Some(1),
        params: &[ArgKind::Text, COMPLETION_STATUS],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::HTOS_OPERATION_UPDATE,
        direction: Direction::Outbound,
        token_at: Some(1),
        params: &[ArgKind::Text],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::HTOS_SET_STRING_COMPLETED,
        direction: Direction::Outbound,
        token_at: None,
        params: &[ArgKind::Text, STRING_STATUS],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::HTOS_LOG,
        direction: Direction::Outbound,
        token_at: None,
        params: &[LOG_LEVEL],
        rest: Some(ArgKind::Text),
    },
    MessageSchema {
        tag: tags::HTOS_HEARTBEAT,
        direction: Direction::Outbound,
        token_at: None,
        params: &[ArgKind::Integer],
        rest: None,
    },
];

/// Look up the schema of `tag`.
pub fn schema_for(tag: &str) -> Option<&'static MessageSchema> {
    SCHEMAS.iter().find(|s| s.tag == tag)
}

// ─────────────────────────────────────────────────────────────────────────────
// FrameCodec
// ─────────────────────────────────────────────────────────────────────────────

/// Stateful decoder / stateless encoder for DCSS text frames.
///
/// The codec only accepts frames travelling in its configured
/// [`Direction`]: the bridge decodes [`Direction::Inbound`] traffic while a
/// test peer standing in for DCSS decodes [`Direction::Outbound`] traffic.
#[derive(Debug)]
pub struct FrameCodec {
    direction: Direction,
    buf: BytesMut,
    poisoned: bool,
}

impl FrameCodec {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            buf: BytesMut::new(),
            poisoned: false,
        }
    }

    /// Codec for control system → bridge traffic.
    pub fn inbound() -> Self {
        Self::new(Direction::Inbound)
    }

    /// Codec for bridge → control system traffic.
    pub fn outbound() -> Self {
        Self::new(Direction::Outbound)
    }

    /// Number of bytes of an incomplete line retained from earlier chunks.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append `chunk` to the retained partial buffer and return a lazy
    /// iterator over the frames it completes.
    ///
    /// The iterator stops after yielding a fatal error; every later call then
    /// yields a single framing error because the stream can no longer be
    /// resynchronised.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Frames<'_> {
        if !self.poisoned {
            self.buf.extend_from_slice(chunk);
        }
        Frames {
            codec: self,
            done: false,
        }
    }

    /// Serialise `frame` into its wire form, including the delimiter.
    ///
    /// Arguments that are empty or contain whitespace or braces are wrapped
    /// in braces.  Embedded line breaks are replaced by spaces since they can
    /// never be part of a well-formed frame.
    pub fn encode(frame: &Frame) -> Vec<u8> {
        let token_at = schema_for(&frame.operation)
            .and_then(|s| s.token_at)
            .unwrap_or(0);

        let mut words: Vec<&str> = frame.args.iter().map(String::as_str).collect();
        if let Some(token) = &frame.token {
            words.insert(token_at.min(words.len()), token.as_str());
        }

        let mut out = String::with_capacity(frame.operation.len() + 8 * words.len());
        out.push_str(&frame.operation);
        for word in words {
            out.push(' ');
            push_word(&mut out, word);
        }
        out.push(DELIMITER as char);
        out.into_bytes()
    }

    /// Parse one complete line (without delimiter).  Blank lines yield
    /// `Ok(None)`.
    pub fn parse_line(&self, line: &[u8]) -> Result<Option<Frame>, ProtocolError> {
        let end = line
            .iter()
            .rposition(|b| !matches!(b, b'\r' | b'\0' | b' ' | b'\t'))
            .map_or(0, |i| i + 1);
        let text = std::str::from_utf8(&line[..end]).map_err(|e| ProtocolError::Framing {
            raw: String::from_utf8_lossy(line).into_owned(),
            reason: format!("invalid utf-8: {e}"),
        })?;
        let text = text.trim_start();
        if text.is_empty() {
            return Ok(None);
        }

        let mut words = tokenize(text).map_err(|reason| ProtocolError::Malformed {
            raw: text.to_string(),
            reason,
        })?;
        let tag = words.remove(0);

        let schema = match schema_for(&tag) {
            Some(s) if s.direction == self.direction => s,
            _ => {
                return Err(ProtocolError::UnknownOperation {
                    raw: text.to_string(),
                });
            }
        };

        let malformed = |reason: String| ProtocolError::Malformed {
            raw: text.to_string(),
            reason,
        };

        let token = match schema.token_at {
            Some(at) if words.len() > at => Some(Token::new(words.remove(at))),
            Some(_) => return Err(malformed("missing correlation token".to_string())),
            None => None,
        };

        if words.len() < schema.params.len() {
            return Err(malformed(format!(
                "expected at least {} argument(s), got {}",
                schema.params.len(),
                words.len()
            )));
        }
        for (i, (kind, value)) in schema.params.iter().zip(&words).enumerate() {
            if !kind.accepts(value) {
                return Err(malformed(format!("argument {i} {value:?} is not {kind:?}")));
            }
        }
        let extra = &words[schema.params.len()..];
        match schema.rest {
            None if !extra.is_empty() => {
                return Err(malformed(format!("{} unexpected trailing argument(s)", extra.len())));
            }
            Some(kind) => {
                if let Some(bad) = extra.iter().find(|v| !kind.accepts(v)) {
                    return Err(malformed(format!("argument {bad:?} is not {kind:?}")));
                }
            }
            None => {}
        }

        Ok(Some(Frame {
            direction: schema.direction,
            operation: tag,
            args: words,
            token,
        }))
    }
}

/// Lazy iterator returned by [`FrameCodec::decode_chunk`].
pub struct Frames<'a> {
    codec: &'a mut FrameCodec,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.codec.poisoned {
            self.done = true;
            return Some(Err(ProtocolError::Framing {
                raw: String::new(),
                reason: "stream already corrupted".to_string(),
            }));
        }
        loop {
            let line = match split_line(&mut self.codec.buf)? {
                Ok(line) => line,
                Err(e) => {
                    self.codec.poisoned = true;
                    self.done = true;
                    return Some(Err(e));
                }
            };
            match self.codec.parse_line(&line) {
                Ok(None) => continue,
                Ok(Some(frame)) => return Some(Ok(frame)),
                Err(e) => {
                    if e.is_fatal() {
                        self.codec.poisoned = true;
                        self.done = true;
                    }
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Decoder for FrameCodec {
    /// Recoverable decode errors are items; fatal ones end the stream.
    type Item = Result<Frame, ProtocolError>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(line) = split_line(src) else {
                return Ok(None);
            };
            match self.parse_line(&line?) {
                Ok(None) => continue,
                Ok(Some(frame)) => return Ok(Some(Ok(frame))),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => return Ok(Some(Err(e))),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                if !src.is_empty() {
                    debug!(bytes = src.len(), "discarding unterminated line at end of stream");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = FrameCodec::encode(&frame);
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Split the next complete line off `buf`.
fn split_line(buf: &mut BytesMut) -> Option<Result<BytesMut, ProtocolError>> {
    match buf.iter().position(|b| *b == DELIMITER) {
        Some(i) if i > MAX_FRAME_LEN => {
            let raw = excerpt(buf);
            buf.clear();
            Some(Err(ProtocolError::Framing {
                raw,
                reason: format!("line of {i} bytes exceeds {MAX_FRAME_LEN}"),
            }))
        }
        Some(i) => {
            let mut line = buf.split_to(i + 1);
            line.truncate(i);
            Some(Ok(line))
        }
        None if buf.len() > MAX_FRAME_LEN => {
            let raw = excerpt(buf);
            let len = buf.len();
            buf.clear();
            Some(Err(ProtocolError::Framing {
                raw,
                reason: format!("{len} bytes without delimiter"),
            }))
        }
        None => None,
    }
}

/// Leading bytes of an oversized buffer, kept for the error report.
fn excerpt(buf: &[u8]) -> String {
    String::from_utf8_lossy(&buf[..buf.len().min(EXCERPT_LEN)]).into_owned()
}

/// Split a line into words, honouring brace grouping.
fn tokenize(text: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '{' {
            chars.next();
            let mut depth = 1usize;
            let mut end = None;
            for (i, ch) in chars.by_ref() {
                match ch {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let end = end.ok_or_else(|| "unbalanced braces".to_string())?;
            if let Some(&(_, next)) = chars.peek()
                && !next.is_whitespace()
            {
                return Err(format!("unexpected {next:?} after closing brace"));
            }
            words.push(text[start + 1..end].to_string());
        } else {
            let mut end = text.len();
            while let Some(&(i, ch)) = chars.peek() {
                if ch.is_whitespace() {
                    end = i;
                    break;
                }
                if ch == '{' || ch == '}' {
                    return Err(format!("stray brace in word at byte {i}"));
                }
                chars.next();
            }
            words.push(text[start..end].to_string());
        }
    }

    if words.is_empty() {
        return Err("empty frame".to_string());
    }
    Ok(words)
}

fn push_word(out: &mut String, word: &str) {
    let needs_braces =
        word.is_empty() || word.chars().any(|c| c.is_whitespace() || c == '{' || c == '}');
    if needs_braces {
        out.push('{');
    }
    out.extend(word.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }));
    if needs_braces {
        out.push('}');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use robodhs_types::{CompletionStatus, LogLevel};
    use tokio_util::codec::FramedRead;

    fn decode_all(codec: &mut FrameCodec, bytes: &[u8]) -> Vec<Result<Frame, ProtocolError>> {
        codec.decode_chunk(bytes).collect()
    }

    #[test]
    fn start_operation_extracts_token_after_op_name() {
        let mut codec = FrameCodec::inbound();
        let frames = decode_all(&mut codec, b"stoh_start_operation mount_crystal 1.7 l 3 A 0\n");
        assert_eq!(frames.len(), 1);
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.operation, tags::STOH_START_OPERATION);
        assert_eq!(frame.token, Some(Token::new("1.7")));
        assert_eq!(frame.args, vec!["mount_crystal", "l", "3", "A", "0"]);
        assert_eq!(frame.direction, Direction::Inbound);
    }

    #[test]
    fn partial_line_is_retained_across_chunks() {
        let mut codec = FrameCodec::inbound();
        assert!(decode_all(&mut codec, b"stoh_start_operation robot_st").is_empty());
        assert!(codec.buffered() > 0);
        let frames = decode_all(&mut codec, b"andby 2.1\nstoh_abort_all soft\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap().args, vec!["robot_standby"]);
        assert_eq!(frames[1].as_ref().unwrap().operation, tags::STOH_ABORT_ALL);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn crlf_nul_padding_and_blank_lines_are_ignored() {
        let mut codec = FrameCodec::inbound();
        let frames = decode_all(&mut codec, b"\n\r\nstoc_send_client_type\0\0\0\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap().operation, tags::STOC_SEND_CLIENT_TYPE);
    }

    #[test]
    fn unknown_operation_is_recoverable() {
        let mut codec = FrameCodec::inbound();
        let frames = decode_all(&mut codec, b"stoh_bogus 1 2\nstoh_heartbeat\n");
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(ProtocolError::UnknownOperation { .. })));
        assert!(frames[1].is_ok());
    }

    #[test]
    fn outbound_tag_is_unknown_to_inbound_codec() {
        let mut codec = FrameCodec::inbound();
        let frames = decode_all(&mut codec, b"htos_heartbeat 1\n");
        assert!(matches!(frames[0], Err(ProtocolError::UnknownOperation { .. })));
    }

    #[test]
    fn missing_token_is_malformed() {
        let mut codec = FrameCodec::inbound();
        let frames = decode_all(&mut codec, b"stoh_start_operation robot_standby\n");
        match &frames[0] {
            Err(ProtocolError::Malformed { reason, .. }) => assert!(reason.contains("token")),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn enumerated_argument_is_validated() {
        let mut codec = FrameCodec::outbound();
        let frames = decode_all(&mut codec, b"htos_operation_completed op 1.1 maybe\n");
        assert!(matches!(frames[0], Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn integer_argument_is_validated() {
        let mut codec = FrameCodec::outbound();
        let frames = decode_all(&mut codec, b"htos_heartbeat abc\nhtos_heartbeat 4\n");
        assert!(matches!(frames[0], Err(ProtocolError::Malformed { .. })));
        assert_eq!(frames[1].as_ref().unwrap().args, vec!["4"]);
    }

    #[test]
    fn unexpected_trailing_arguments_are_malformed() {
        let mut codec = FrameCodec::inbound();
        let frames = decode_all(&mut codec, b"stoc_send_client_type extra\n");
        assert!(matches!(frames[0], Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn braces_group_words() {
        let mut codec = FrameCodec::outbound();
        let frames = decode_all(
            &mut codec,
            b"htos_set_string_completed robot_state normal {on gonio} {} {l 1 A}\n",
        );
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.args, vec!["robot_state", "normal", "on gonio", "", "l 1 A"]);
    }

    #[test]
    fn unbalanced_braces_are_malformed_not_fatal() {
        let mut codec = FrameCodec::inbound();
        let frames = decode_all(&mut codec, b"stoh_abort_all {oops\nstoh_abort_all\n");
        assert!(matches!(frames[0], Err(ProtocolError::Malformed { .. })));
        assert!(frames[1].is_ok());
    }

    #[test]
    fn overlong_line_poisons_the_stream() {
        let mut codec = FrameCodec::inbound();
        let junk = vec![b'x'; MAX_FRAME_LEN + 1];
        let frames = decode_all(&mut codec, &junk);
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Err(e) if e.is_fatal()));

        let later = decode_all(&mut codec, b"stoh_heartbeat\n");
        assert_eq!(later.len(), 1);
        assert!(matches!(&later[0], Err(ProtocolError::Framing { .. })));
    }

    #[test]
    fn excerpt_is_bounded_by_the_buffer() {
        assert_eq!(excerpt(b"short"), "short");
        assert_eq!(excerpt(b""), "");
        assert_eq!(excerpt(&[b'y'; 200]).len(), EXCERPT_LEN);
    }

    #[test]
    fn invalid_utf8_is_framing_corruption() {
        let mut codec = FrameCodec::inbound();
        let frames = decode_all(&mut codec, b"stoh_heartbeat \xff\xfe\nstoh_heartbeat\n");
        assert_eq!(frames.len(), 1, "iterator must stop after a fatal error");
        assert!(matches!(frames[0], Err(ProtocolError::Framing { .. })));
    }

    #[test]
    fn encode_wraps_spaced_and_empty_arguments() {
        let frame = Frame::set_string(
            "robot_status",
            vec!["state:".to_string(), "{idle}".to_string(), "".to_string(), "on gonio".to_string()],
        );
        let bytes = FrameCodec::encode(&frame);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "htos_set_string_completed robot_status normal state: {{idle}} {} {on gonio}\n"
        );
    }

    #[test]
    fn encode_places_token_after_op_name() {
        let frame = Frame::operation_completed(
            "mount_crystal",
            Token::new("1.7"),
            CompletionStatus::Normal,
            &["OK"],
        );
        assert_eq!(
            FrameCodec::encode(&frame),
            b"htos_operation_completed mount_crystal 1.7 normal OK\n".to_vec()
        );
    }

    #[test]
    fn log_frame_encodes_bare_words() {
        let frame = Frame::log(LogLevel::Error, "Bad bad happened");
        assert_eq!(FrameCodec::encode(&frame), b"htos_log error Bad bad happened\n".to_vec());
    }

    #[test]
    fn decode_of_encode_preserves_outbound_frames() {
        let frames = vec![
            Frame::client_is_hardware("robot"),
            Frame::heartbeat(42),
            Frame::operation_completed("robot_config", Token::new("3.1"), CompletionStatus::Error, &["jam"]),
            Frame::operation_update("prepare_mount_crystal", Token::new("3.2"), "OK to prepare"),
            Frame::set_string("robot_state", vec!["on gonio".into(), "".into(), "P18".into()]),
            Frame::log(LogLevel::Warning, "lid jam detected"),
        ];
        let mut codec = FrameCodec::outbound();
        for frame in frames {
            let bytes = FrameCodec::encode(&frame);
            let decoded: Vec<_> = codec.decode_chunk(&bytes).collect();
            assert_eq!(decoded.len(), 1);
            assert_eq!(decoded[0].as_ref().unwrap(), &frame);
        }
    }

    #[test]
    fn decode_of_encode_preserves_inbound_frames() {
        let frame = Frame::inbound(
            tags::STOH_START_OPERATION,
            vec!["mount_next_crystal".into(), "l".into(), "1".into(), "A".into(), "r".into(), "2".into(), "B".into()],
        )
        .with_token(Token::new("7.3"));
        let mut codec = FrameCodec::inbound();
        let decoded: Vec<_> = codec.decode_chunk(&FrameCodec::encode(&frame)).collect();
        assert_eq!(decoded[0].as_ref().unwrap(), &frame);
    }

    #[tokio::test]
    async fn framed_read_surfaces_recoverable_errors_as_items() {
        let bytes: &[u8] = b"stoh_nope\nstoh_register_operation robot_config robot_config\n";
        let mut reader = FramedRead::new(bytes, FrameCodec::inbound());

        let first = reader.next().await.expect("item").expect("not fatal");
        assert!(matches!(first, Err(ProtocolError::UnknownOperation { .. })));

        let second = reader.next().await.expect("item").expect("not fatal").expect("frame");
        assert_eq!(second.operation, tags::STOH_REGISTER_OPERATION);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn framed_read_ends_with_error_on_corruption() {
        let bytes: &[u8] = b"stoh_heartbeat \xc3\x28\n";
        let mut reader = FramedRead::new(bytes, FrameCodec::inbound());
        let item = reader.next().await.expect("item");
        assert!(matches!(item, Err(ProtocolError::Framing { .. })));
    }
}
