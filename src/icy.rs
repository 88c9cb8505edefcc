//! ICY (Shoutcast/Icecast) in-band metadata.
//!
//! When a request carries `Icy-MetaData: 1`, servers that support it answer
//! with an `icy-metaint` header and interleave a metadata block after every
//! `icy-metaint` bytes of audio. The block is one length byte (in units of
//! 16 bytes) followed by that many NUL-padded bytes of text.

use log::debug;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::utils::parsing::ParsingUtils;

/// Raw metadata carried by one ICY block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IcyInfo {
    pub title: Option<String>,
    pub url: Option<String>,
}

/// Read the metadata interval announced by the server, if any.
pub fn metaint_from_headers(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("icy-metaint")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|metaint| *metaint > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemuxState {
    Audio { remaining: usize },
    Length,
    Metadata { remaining: usize },
}

/// Output of one [`IcyDemuxer::push`] call.
#[derive(Debug, Default)]
pub struct DemuxedChunk {
    pub audio: Vec<u8>,
    pub metadata: Vec<IcyInfo>,
}

/// Incremental splitter of audio bytes and metadata blocks.
///
/// Chunks may be cut anywhere, including inside the length byte's block.
#[derive(Debug)]
pub struct IcyDemuxer {
    metaint: usize,
    state: DemuxState,
    block: Vec<u8>,
}

impl IcyDemuxer {
    /// Returns `None` for a zero interval, which no server can mean.
    pub fn new(metaint: usize) -> Option<Self> {
        if metaint == 0 {
            return None;
        }
        Some(Self {
            metaint,
            state: DemuxState::Audio { remaining: metaint },
            block: Vec::new(),
        })
    }

    pub fn push(&mut self, mut input: &[u8]) -> DemuxedChunk {
        let mut out = DemuxedChunk {
            audio: Vec::with_capacity(input.len()),
            metadata: Vec::new(),
        };

        while !input.is_empty() {
            match self.state {
                DemuxState::Audio { remaining } => {
                    let n = remaining.min(input.len());
                    out.audio.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    self.state = if n == remaining {
                        DemuxState::Length
                    } else {
                        DemuxState::Audio { remaining: remaining - n }
                    };
                }
                DemuxState::Length => {
                    let len = input[0] as usize * 16;
                    input = &input[1..];
                    self.block.clear();
                    self.state = if len == 0 {
                        DemuxState::Audio { remaining: self.metaint }
                    } else {
                        DemuxState::Metadata { remaining: len }
                    };
                }
                DemuxState::Metadata { remaining } => {
                    let n = remaining.min(input.len());
                    self.block.extend_from_slice(&input[..n]);
                    input = &input[n..];
                    if n == remaining {
                        if let Some(info) = self.finish_block() {
                            out.metadata.push(info);
                        }
                        self.state = DemuxState::Audio { remaining: self.metaint };
                    } else {
                        self.state = DemuxState::Metadata { remaining: remaining - n };
                    }
                }
            }
        }

        out
    }

    fn finish_block(&mut self) -> Option<IcyInfo> {
        let text = String::from_utf8_lossy(&self.block);
        let text = text.trim_end_matches('\0');
        if text.trim().is_empty() {
            return None;
        }
        debug!("ICY metadata block: {}", text);
        Some(ParsingUtils::parse_icy_metadata(text))
    }
}
