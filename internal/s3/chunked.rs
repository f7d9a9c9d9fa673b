use super::request::ChunkDetail;
use sha2::{Digest, Sha256};

// Incremental decoder for aws-chunked framing:
// `<hex-size>;chunk-signature=<hex>\r\n<payload>\r\n`, terminated by a
// zero-size chunk and an optional trailer section.
pub struct ChunkedDecoder {
    state: DecodeState,
    scratch: Vec<u8>,
    hasher: Sha256,
    chunk_size: usize,
    remaining: usize,
    signature: String,
    finished: bool,
}

enum DecodeState {
    Header,
    Payload,
    PayloadCrlf,
    Trailer,
}

#[derive(Debug, Default)]
pub struct DecodeOutput {
    pub payload: Vec<u8>,
    pub details: Vec<ChunkDetail>,
    pub finished: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            scratch: Vec::new(),
            hasher: Sha256::new(),
            chunk_size: 0,
            remaining: 0,
            signature: String::new(),
            finished: false,
        }
    }

    pub fn feed(&mut self, input: &[u8]) -> Result<DecodeOutput, DecodeError> {
        self.scratch.extend_from_slice(input);
        let mut out = DecodeOutput::default();
        loop {
            match self.state {
                DecodeState::Header => {
                    let Some(line) = self.take_line()? else {
                        break;
                    };
                    let (size, signature) = parse_chunk_header(&line)?;
                    self.signature = signature;
                    self.chunk_size = size;
                    self.remaining = size;
                    if size == 0 {
                        out.details.push(self.finish_chunk());
                        self.state = DecodeState::Trailer;
                    } else {
                        self.state = DecodeState::Payload;
                    }
                }
                DecodeState::Payload => {
                    if self.scratch.is_empty() {
                        break;
                    }
                    let take = self.remaining.min(self.scratch.len());
                    let bytes: Vec<u8> = self.scratch.drain(..take).collect();
                    self.hasher.update(&bytes);
                    out.payload.extend_from_slice(&bytes);
                    self.remaining -= take;
                    if self.remaining == 0 {
                        self.state = DecodeState::PayloadCrlf;
                    }
                }
                DecodeState::PayloadCrlf => {
                    if self.scratch.len() < 2 {
                        break;
                    }
                    if &self.scratch[..2] != b"\r\n" {
                        return Err(DecodeError("missing chunk payload delimiter".to_string()));
                    }
                    self.scratch.drain(..2);
                    out.details.push(self.finish_chunk());
                    self.state = DecodeState::Header;
                }
                DecodeState::Trailer => {
                    let Some(line) = self.take_line()? else {
                        if self.scratch.is_empty() {
                            self.finished = true;
                        }
                        break;
                    };
                    if line.is_empty() {
                        self.finished = true;
                        break;
                    }
                    // Trailer headers are not part of the signed stream here.
                }
            }
        }
        out.finished = self.finished;
        Ok(out)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn take_line(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        let Some(end) = find_crlf(&self.scratch) else {
            if self.scratch.len() > MAX_HEADER_BYTES {
                return Err(DecodeError("chunk header too long".to_string()));
            }
            return Ok(None);
        };
        let line: Vec<u8> = self.scratch.drain(..end).collect();
        self.scratch.drain(..2);
        Ok(Some(line))
    }

    fn finish_chunk(&mut self) -> ChunkDetail {
        let hasher = std::mem::take(&mut self.hasher);
        ChunkDetail {
            signature: std::mem::take(&mut self.signature),
            payload_hash: hex::encode(hasher.finalize()),
            size: self.chunk_size,
        }
    }
}

const MAX_HEADER_BYTES: usize = 1024;

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == b"\r\n")
}

fn parse_chunk_header(line: &[u8]) -> Result<(usize, String), DecodeError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| DecodeError("chunk header is not valid utf-8".to_string()))?;
    let mut parts = text.split(';');
    let size_hex = parts.next().unwrap_or("").trim();
    let size = usize::from_str_radix(size_hex, 16)
        .map_err(|_| DecodeError(format!("invalid chunk size {size_hex:?}")))?;
    let signature = parts
        .find_map(|part| part.trim().strip_prefix("chunk-signature="))
        .ok_or_else(|| DecodeError("chunk header missing chunk-signature".to_string()))?;
    Ok((size, signature.to_string()))
}

#[cfg(test)]
mod tests {
    use super::ChunkedDecoder;
    use sha2::{Digest, Sha256};

    fn framed(payload: &[u8], signature: &str) -> Vec<u8> {
        let mut out = format!("{:x};chunk-signature={}\r\n", payload.len(), signature).into_bytes();
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn terminal(signature: &str) -> Vec<u8> {
        format!("0;chunk-signature={}\r\n\r\n", signature).into_bytes()
    }

    #[test]
    fn decodes_two_chunks_and_a_terminal_chunk() {
        let mut stream = framed(b"ABCD", "sig-1");
        stream.extend_from_slice(&framed(b"EFGH", "sig-2"));
        stream.extend_from_slice(&terminal("sig-3"));

        let mut decoder = ChunkedDecoder::new();
        let out = decoder.feed(&stream).expect("decode");
        assert_eq!(out.payload, b"ABCDEFGH");
        assert_eq!(out.details.len(), 3);
        assert_eq!(out.details[0].signature, "sig-1");
        assert_eq!(out.details[0].size, 4);
        assert_eq!(
            out.details[0].payload_hash,
            hex::encode(Sha256::digest(b"ABCD"))
        );
        assert_eq!(out.details[1].payload_hash, hex::encode(Sha256::digest(b"EFGH")));
        assert_eq!(out.details[2].size, 0);
        assert_eq!(
            out.details[2].payload_hash,
            hex::encode(Sha256::digest(b""))
        );
        assert!(out.finished);
        assert!(decoder.is_finished());
    }

    #[test]
    fn decodes_across_arbitrary_feed_boundaries() {
        let mut stream = framed(b"hello world", "sig-a");
        stream.extend_from_slice(&terminal("sig-b"));

        let mut decoder = ChunkedDecoder::new();
        let mut payload = Vec::new();
        let mut details = Vec::new();
        for piece in stream.chunks(3) {
            let out = decoder.feed(piece).expect("decode");
            payload.extend_from_slice(&out.payload);
            details.extend(out.details);
        }
        assert_eq!(payload, b"hello world");
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].signature, "sig-a");
        assert_eq!(details[1].size, 0);
        assert!(decoder.is_finished());
    }

    #[test]
    fn rejects_header_without_signature() {
        let mut decoder = ChunkedDecoder::new();
        let err = decoder.feed(b"4\r\nABCD\r\n").expect_err("missing signature");
        assert!(err.0.contains("chunk-signature"));
    }

    #[test]
    fn rejects_bad_chunk_size() {
        let mut decoder = ChunkedDecoder::new();
        let err = decoder
            .feed(b"zz;chunk-signature=s\r\n")
            .expect_err("bad size");
        assert!(err.0.contains("invalid chunk size"));
    }

    #[test]
    fn rejects_missing_payload_delimiter() {
        let mut decoder = ChunkedDecoder::new();
        let err = decoder
            .feed(b"2;chunk-signature=s\r\nABXX")
            .expect_err("bad delimiter");
        assert!(err.0.contains("delimiter"));
    }
}
