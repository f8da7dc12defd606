//! Fixed-layout binary codec for consensus messages.
//!
//! Every frame is an 8 byte header followed by a fixed-width body:
//!
//! ```text
//! [block_length: u16][template_id: u16][schema_id: u16][version: u16]
//! [body: block_length bytes]
//! ```
//!
//! All integers are little-endian. The body holds the message fields in
//! declared order without padding. A decoder accepts a body longer than the
//! block it knows about and ignores the trailing bytes, so newer senders can
//! append fields without breaking older receivers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::CodecError;
use super::message::{AppendEntries, AppendEntriesResponse, RaftMessage, RequestVote, VoteResponse};

pub const SCHEMA_ID: u16 = 5;
pub const SCHEMA_VERSION: u16 = 1;

pub mod template {
    pub const REQUEST_VOTE: u16 = 1;
    pub const VOTE_RESPONSE: u16 = 2;
    pub const APPEND_ENTRIES: u16 = 3;
    pub const APPEND_ENTRIES_RESPONSE: u16 = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub block_length: u16,
    pub template_id: u16,
    pub schema_id: u16,
    pub version: u16,
}

impl MessageHeader {
    pub const ENCODED_LENGTH: usize = 8;

    pub fn decode(src: &[u8]) -> Result<Self, CodecError> {
        if src.len() < Self::ENCODED_LENGTH {
            return Err(CodecError::Truncated {
                required: Self::ENCODED_LENGTH,
                available: src.len(),
            });
        }

        let mut buf = &src[..Self::ENCODED_LENGTH];
        Ok(Self {
            block_length: buf.get_u16_le(),
            template_id: buf.get_u16_le(),
            schema_id: buf.get_u16_le(),
            version: buf.get_u16_le(),
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16_le(self.block_length);
        dst.put_u16_le(self.template_id);
        dst.put_u16_le(self.schema_id);
        dst.put_u16_le(self.version);
    }

    /// Total frame length announced by this header.
    pub fn frame_len(&self) -> usize {
        Self::ENCODED_LENGTH + self.block_length as usize
    }
}

/// One byte boolean tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BooleanType {
    False = 0,
    True = 1,
}

impl BooleanType {
    pub fn from_bool(value: bool) -> Self {
        if value {
            BooleanType::True
        } else {
            BooleanType::False
        }
    }

    /// Only an exact `TRUE` tag counts as true; unknown tags read as false.
    pub fn decode(raw: u8) -> bool {
        raw == BooleanType::True as u8
    }
}

/// A message with a fixed block layout under [`SCHEMA_ID`].
pub trait WireMessage: Sized {
    const TEMPLATE_ID: u16;
    const BLOCK_LENGTH: u16;

    fn write_body<B: BufMut>(&self, dst: &mut B);

    /// `body` is guaranteed to hold at least `BLOCK_LENGTH` bytes.
    fn read_body(body: &[u8]) -> Self;

    fn header() -> MessageHeader {
        MessageHeader {
            block_length: Self::BLOCK_LENGTH,
            template_id: Self::TEMPLATE_ID,
            schema_id: SCHEMA_ID,
            version: SCHEMA_VERSION,
        }
    }

    fn encoded_len(&self) -> usize {
        MessageHeader::ENCODED_LENGTH + Self::BLOCK_LENGTH as usize
    }

    fn encode_into<B: BufMut>(&self, dst: &mut B) {
        Self::header().encode(dst);
        self.write_body(dst);
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn decode(src: &[u8]) -> Result<Self, CodecError> {
        let header = MessageHeader::decode(src)?;
        let body = body_for(&header, src, Self::TEMPLATE_ID, Self::BLOCK_LENGTH)?;
        Ok(Self::read_body(body))
    }
}

/// Validates `header` against the expected template and returns the known
/// part of the body.
fn body_for<'a>(
    header: &MessageHeader,
    src: &'a [u8],
    template_id: u16,
    block_length: u16,
) -> Result<&'a [u8], CodecError> {
    if header.schema_id != SCHEMA_ID {
        return Err(CodecError::SchemaMismatch {
            expected: SCHEMA_ID,
            actual: header.schema_id,
        });
    }
    if header.template_id != template_id {
        return Err(CodecError::TemplateMismatch {
            expected: template_id,
            actual: header.template_id,
        });
    }
    if header.block_length < block_length {
        return Err(CodecError::BlockTooShort {
            declared: header.block_length,
            required: block_length,
        });
    }
    if src.len() < header.frame_len() {
        return Err(CodecError::Truncated {
            required: header.frame_len(),
            available: src.len(),
        });
    }

    let start = MessageHeader::ENCODED_LENGTH;
    Ok(&src[start..start + block_length as usize])
}

impl WireMessage for RequestVote {
    const TEMPLATE_ID: u16 = template::REQUEST_VOTE;
    const BLOCK_LENGTH: u16 = 4 + 4 + 4 + 8;

    fn write_body<B: BufMut>(&self, dst: &mut B) {
        dst.put_i32_le(self.candidate_id);
        dst.put_i32_le(self.term);
        dst.put_i32_le(self.last_log_term);
        dst.put_i64_le(self.last_log_index);
    }

    fn read_body(mut body: &[u8]) -> Self {
        Self {
            candidate_id: body.get_i32_le(),
            term: body.get_i32_le(),
            last_log_term: body.get_i32_le(),
            last_log_index: body.get_i64_le(),
        }
    }
}

impl WireMessage for VoteResponse {
    const TEMPLATE_ID: u16 = template::VOTE_RESPONSE;
    const BLOCK_LENGTH: u16 = 4 + 4 + 1;

    fn write_body<B: BufMut>(&self, dst: &mut B) {
        dst.put_i32_le(self.id);
        dst.put_i32_le(self.term);
        dst.put_u8(BooleanType::from_bool(self.granted) as u8);
    }

    fn read_body(mut body: &[u8]) -> Self {
        Self {
            id: body.get_i32_le(),
            term: body.get_i32_le(),
            granted: BooleanType::decode(body.get_u8()),
        }
    }
}

impl WireMessage for AppendEntries {
    const TEMPLATE_ID: u16 = template::APPEND_ENTRIES;
    const BLOCK_LENGTH: u16 = 4 + 4 + 4 + 8 + 8;

    fn write_body<B: BufMut>(&self, dst: &mut B) {
        dst.put_i32_le(self.leader_id);
        dst.put_i32_le(self.term);
        dst.put_i32_le(self.prev_log_term);
        dst.put_i64_le(self.prev_log_index);
        dst.put_i64_le(self.commit_position);
    }

    fn read_body(mut body: &[u8]) -> Self {
        Self {
            leader_id: body.get_i32_le(),
            term: body.get_i32_le(),
            prev_log_term: body.get_i32_le(),
            prev_log_index: body.get_i64_le(),
            commit_position: body.get_i64_le(),
        }
    }
}

impl WireMessage for AppendEntriesResponse {
    const TEMPLATE_ID: u16 = template::APPEND_ENTRIES_RESPONSE;
    const BLOCK_LENGTH: u16 = 4 + 4 + 1;

    fn write_body<B: BufMut>(&self, dst: &mut B) {
        dst.put_i32_le(self.id);
        dst.put_i32_le(self.term);
        dst.put_u8(BooleanType::from_bool(self.success) as u8);
    }

    fn read_body(mut body: &[u8]) -> Self {
        Self {
            id: body.get_i32_le(),
            term: body.get_i32_le(),
            success: BooleanType::decode(body.get_u8()),
        }
    }
}

/// Decodes any known template by peeking at the header.
pub fn decode_message(src: &[u8]) -> Result<RaftMessage, CodecError> {
    let header = MessageHeader::decode(src)?;
    if header.schema_id != SCHEMA_ID {
        return Err(CodecError::SchemaMismatch {
            expected: SCHEMA_ID,
            actual: header.schema_id,
        });
    }

    match header.template_id {
        template::REQUEST_VOTE => RequestVote::decode(src).map(RaftMessage::RequestVote),
        template::VOTE_RESPONSE => VoteResponse::decode(src).map(RaftMessage::VoteResponse),
        template::APPEND_ENTRIES => AppendEntries::decode(src).map(RaftMessage::AppendEntries),
        template::APPEND_ENTRIES_RESPONSE => {
            AppendEntriesResponse::decode(src).map(RaftMessage::AppendEntriesResponse)
        }
        other => Err(CodecError::UnknownTemplate(other)),
    }
}

pub fn encode_message(message: &RaftMessage) -> Bytes {
    match message {
        RaftMessage::RequestVote(m) => m.encode(),
        RaftMessage::VoteResponse(m) => m.encode(),
        RaftMessage::AppendEntries(m) => m.encode(),
        RaftMessage::AppendEntriesResponse(m) => m.encode(),
    }
}

/// Reusable decode destination.
///
/// Holds the last successfully decoded message, or nothing. A failed decode
/// leaves the slot empty so a stale value is never mistaken for a fresh one.
#[derive(Debug)]
pub struct DecodeSlot<M> {
    value: Option<M>,
}

impl<M: WireMessage> DecodeSlot<M> {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn reset(&mut self) {
        self.value = None;
    }

    pub fn decode_from(&mut self, src: &[u8]) -> Result<&M, CodecError> {
        self.value = None;
        let decoded = M::decode(src)?;
        Ok(self.value.insert(decoded))
    }

    pub fn get(&self) -> Option<&M> {
        self.value.as_ref()
    }
}

impl<M: WireMessage> Default for DecodeSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}
