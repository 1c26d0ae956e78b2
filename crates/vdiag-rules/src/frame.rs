//! ISO-TP framing and multi-frame reassembly
//!
//! Frames are classified by the protocol control nibble of the first byte.
//! Payloads whose first byte is a response SID (`>= 0x40`) are already
//! unframed, which is how most adapters hand single-frame answers back.

use crate::error::FrameError;

/// Negative response service id
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

/// NRC 0x78: request received, response pending
pub const NRC_RESPONSE_PENDING: u8 = 0x78;

/// One physical frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Complete payload in one frame
    Single(Vec<u8>),
    /// Start of a segmented payload of `total` bytes
    First { total: usize, data: Vec<u8> },
    /// Continuation, sequence number 0..=15
    Consecutive { seq: u8, data: Vec<u8> },
    /// Flow control from the other side; carries no payload
    FlowControl,
    /// Payload without a transport header
    Unframed(Vec<u8>),
}

impl Frame {
    /// Classify raw frame bytes
    pub fn classify(bytes: &[u8]) -> Result<Self, FrameError> {
        let first = *bytes.first().ok_or(FrameError::Empty)?;
        if first >= 0x40 {
            return Ok(Frame::Unframed(bytes.to_vec()));
        }
        match first >> 4 {
            0x0 => {
                let (len, offset) = match first & 0x0F {
                    // CAN-FD escape: length in the next byte
                    0 => (
                        *bytes
                            .get(1)
                            .ok_or_else(|| truncated(bytes))? as usize,
                        2,
                    ),
                    n => (n as usize, 1),
                };
                let data = bytes
                    .get(offset..offset + len)
                    .ok_or_else(|| truncated(bytes))?;
                Ok(Frame::Single(data.to_vec()))
            }
            0x1 => {
                let second = *bytes.get(1).ok_or_else(|| truncated(bytes))?;
                let total = (((first & 0x0F) as usize) << 8) | second as usize;
                if total == 0 {
                    // 32-bit length escape
                    let len = bytes.get(2..6).ok_or_else(|| truncated(bytes))?;
                    let total = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
                    Ok(Frame::First {
                        total,
                        data: bytes[6..].to_vec(),
                    })
                } else {
                    Ok(Frame::First {
                        total,
                        data: bytes[2..].to_vec(),
                    })
                }
            }
            0x2 => Ok(Frame::Consecutive {
                seq: first & 0x0F,
                data: bytes[1..].to_vec(),
            }),
            _ => Ok(Frame::FlowControl),
        }
    }
}

fn truncated(bytes: &[u8]) -> FrameError {
    FrameError::Truncated(hex::encode_upper(bytes))
}

/// Result of feeding one frame to a [`Reassembler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Complete(Vec<u8>),
    NeedMore,
}

/// Buffers consecutive frames until the declared length is reached
///
/// The buffer is never handed out before it is complete; callers that give up
/// waiting call [`Reassembler::abandon`] and get the incomplete error.
#[derive(Debug, Default)]
pub struct Reassembler {
    expected: Option<usize>,
    buffer: Vec<u8>,
    next_seq: u8,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a segmented payload is in progress
    pub fn in_progress(&self) -> bool {
        self.expected.is_some()
    }

    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    pub fn expected(&self) -> Option<usize> {
        self.expected
    }

    pub fn push(&mut self, frame: Frame) -> Result<Progress, FrameError> {
        match frame {
            Frame::Single(data) | Frame::Unframed(data) => {
                if self.in_progress() {
                    self.reset();
                    return Err(FrameError::Unexpected("single"));
                }
                Ok(Progress::Complete(data))
            }
            Frame::First { total, data } => {
                if self.in_progress() {
                    self.reset();
                    return Err(FrameError::Unexpected("first"));
                }
                self.expected = Some(total);
                self.buffer = data;
                self.next_seq = 1;
                Ok(self.check_complete())
            }
            Frame::Consecutive { seq, data } => {
                if !self.in_progress() {
                    return Err(FrameError::Unexpected("consecutive"));
                }
                if seq != self.next_seq {
                    let expected = self.next_seq;
                    self.reset();
                    return Err(FrameError::Sequence {
                        expected,
                        actual: seq,
                    });
                }
                self.buffer.extend_from_slice(&data);
                self.next_seq = (self.next_seq + 1) & 0x0F;
                Ok(self.check_complete())
            }
            Frame::FlowControl => Ok(Progress::NeedMore),
        }
    }

    /// Discard the partial buffer and report how far it got
    pub fn abandon(&mut self) -> FrameError {
        let err = FrameError::Incomplete {
            received: self.buffer.len(),
            expected: self.expected.unwrap_or(0),
        };
        self.reset();
        err
    }

    pub fn reset(&mut self) {
        self.expected = None;
        self.buffer.clear();
        self.next_seq = 0;
    }

    fn check_complete(&mut self) -> Progress {
        match self.expected {
            Some(total) if self.buffer.len() >= total => {
                let mut payload = std::mem::take(&mut self.buffer);
                payload.truncate(total);
                self.reset();
                Progress::Complete(payload)
            }
            _ => Progress::NeedMore,
        }
    }
}

/// `7F <sid> 78`: the ECU needs more time and will answer later
pub fn is_response_pending(payload: &[u8]) -> bool {
    payload.len() >= 3 && payload[0] == NEGATIVE_RESPONSE_SID && payload[2] == NRC_RESPONSE_PENDING
}

/// Reassemble a complete payload from a sequence of frames
///
/// Response-pending answers are skipped. Running out of frames before the
/// declared length is reached is an incomplete response.
pub fn reassemble<I>(frames: I) -> Result<Vec<u8>, FrameError>
where
    I: IntoIterator<Item = Frame>,
{
    let mut reassembler = Reassembler::new();
    for frame in frames {
        if let Progress::Complete(payload) = reassembler.push(frame)? {
            if is_response_pending(&payload) {
                continue;
            }
            return Ok(payload);
        }
    }
    Err(reassembler.abandon())
}

/// Parse adapter output into frames
///
/// Accepts whitespace-separated or compact hex lines, and the ELM327 CAN
/// auto-format where a three-digit length line precedes `N:` indexed lines
/// whose transport headers have already been stripped.
pub fn parse_adapter_text(text: &str) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    let mut declared: Option<usize> = None;

    for raw in text.lines() {
        let line = raw.trim().trim_start_matches('>').trim();
        if line.is_empty() {
            continue;
        }
        let upper = line.to_ascii_uppercase();
        if upper.starts_with("SEARCHING") || upper.starts_with("BUS INIT") || upper == "OK" {
            continue;
        }
        if upper == "NO DATA" {
            return Err(FrameError::NoData);
        }
        if upper == "?"
            || upper.contains("ERROR")
            || upper.starts_with("UNABLE TO CONNECT")
            || upper == "STOPPED"
            || upper == "BUFFER FULL"
        {
            return Err(FrameError::Adapter(line.to_string()));
        }

        if let Some((index, rest)) = line.split_once(':') {
            let seq = u8::from_str_radix(index.trim(), 16)
                .map_err(|_| FrameError::InvalidHex(line.to_string()))?;
            let data = decode_hex(rest)?;
            let total = declared.ok_or_else(|| FrameError::Truncated(line.to_string()))?;
            if seq == 0 && frames.is_empty() {
                frames.push(Frame::First { total, data });
            } else {
                frames.push(Frame::Consecutive {
                    seq: seq & 0x0F,
                    data,
                });
            }
            continue;
        }

        let compact: String = line.split_whitespace().collect();
        if compact.len() == 3 && compact.chars().all(|c| c.is_ascii_hexdigit()) {
            let total = usize::from_str_radix(&compact, 16)
                .map_err(|_| FrameError::InvalidHex(line.to_string()))?;
            declared = Some(total);
            continue;
        }

        frames.push(Frame::classify(&decode_hex(&compact)?)?);
    }
    Ok(frames)
}

fn decode_hex(text: &str) -> Result<Vec<u8>, FrameError> {
    let compact: String = text.split_whitespace().collect();
    hex::decode(&compact).map_err(|_| FrameError::InvalidHex(text.trim().to_string()))
}
