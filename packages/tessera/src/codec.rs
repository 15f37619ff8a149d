//! Token wire format
//!
//! A token is a binary frame encoded as base64url without padding, which is safe in
//! headers, cookies and URLs:
//!
//! ```text
//! version(1) | key id(8, BE) | expiry ns since epoch(8, BE)
//!            | payload len(4, BE) | payload(len) | tag(rest)
//! ```
//!
//! Everything before the tag is the signing input. [`parse`] only checks structure and
//! never needs a key, so the verifier can choose the key from the parsed key id.

use crate::error::{AuthError, AuthResult};
use crate::keychain::KeyId;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};

/// Current frame version
pub const FORMAT_VERSION: u8 = 1;

/// Longest serialized token accepted by [`parse`]
pub const MAX_TOKEN_LEN: usize = 8192;

/// Longest signature tag accepted by [`parse`]
pub const MAX_TAG_LEN: usize = 64;

const HEADER_LEN: usize = 1 + 8 + 8 + 4;

/// Fields of a structurally valid token. Nothing here has been authenticated.
#[derive(Clone, PartialEq, Eq)]
pub struct ParsedToken {
    /// Key the token claims to be signed with
    pub key_id: KeyId,
    /// Claimed expiry
    pub expiry: DateTime<Utc>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Signature tag
    pub signature: Vec<u8>,
}

impl std::fmt::Debug for ParsedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedToken")
            .field("key_id", &self.key_id)
            .field("expiry", &self.expiry)
            .field("payload_len", &self.payload.len())
            .field("signature_len", &self.signature.len())
            .finish()
    }
}

/// Canonical bytes covered by the signature: version, key id, expiry, payload, in that order.
pub fn signing_input(key_id: KeyId, expiry: DateTime<Utc>, payload: &[u8]) -> AuthResult<Vec<u8>> {
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| AuthError::serialization("payload exceeds 4 GiB"))?;
    let expiry_nanos = expiry
        .timestamp_nanos_opt()
        .ok_or_else(|| AuthError::serialization("expiry outside the years 1677-2262"))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + MAX_TAG_LEN);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&key_id.get().to_be_bytes());
    out.extend_from_slice(&expiry_nanos.to_be_bytes());
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Length of the serialized form for the given payload and tag sizes.
#[must_use]
pub fn serialized_len(payload_len: usize, tag_len: usize) -> usize {
    let raw = HEADER_LEN
        .saturating_add(payload_len)
        .saturating_add(tag_len);
    // base64 without padding: 4 chars per 3 bytes, rounded up
    raw.saturating_mul(4).div_ceil(3)
}

/// Encode all token fields into the transport string.
pub fn serialize(
    key_id: KeyId,
    expiry: DateTime<Utc>,
    payload: &[u8],
    signature: &[u8],
) -> AuthResult<String> {
    if signature.is_empty() || signature.len() > MAX_TAG_LEN {
        return Err(AuthError::serialization("signature tag has unsupported length"));
    }
    let mut frame = signing_input(key_id, expiry, payload)?;
    frame.extend_from_slice(signature);
    Ok(URL_SAFE_NO_PAD.encode(frame))
}

/// Split a transport string into its fields without verifying anything.
pub fn parse(token: &str) -> AuthResult<ParsedToken> {
    if token.is_empty() {
        return Err(AuthError::MalformedToken("empty token"));
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(AuthError::MalformedToken("token too long"));
    }

    let frame = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| AuthError::MalformedToken("invalid base64url encoding"))?;

    let mut reader = FrameReader::new(&frame);
    if reader.u8()? != FORMAT_VERSION {
        return Err(AuthError::MalformedToken("unsupported format version"));
    }
    let key_id = KeyId::new(reader.u64()?);
    // every i64 is a valid instant, so no expiry bit pattern is structurally invalid
    let expiry = DateTime::from_timestamp_nanos(reader.i64()?);
    let payload_len = usize::try_from(reader.u32()?)
        .map_err(|_| AuthError::MalformedToken("payload length out of range"))?;
    let payload = reader.take(payload_len)?.to_vec();

    let signature = reader.rest();
    if signature.is_empty() {
        return Err(AuthError::MalformedToken("missing signature"));
    }
    if signature.len() > MAX_TAG_LEN {
        return Err(AuthError::MalformedToken("signature too long"));
    }

    Ok(ParsedToken {
        key_id,
        expiry,
        payload,
        signature: signature.to_vec(),
    })
}

struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> AuthResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(AuthError::MalformedToken("truncated token"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> AuthResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u8(&mut self) -> AuthResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> AuthResult<u32> {
        self.array().map(u32::from_be_bytes)
    }

    fn u64(&mut self) -> AuthResult<u64> {
        self.array().map(u64::from_be_bytes)
    }

    fn i64(&mut self) -> AuthResult<i64> {
        self.array().map(i64::from_be_bytes)
    }

    fn rest(self) -> &'a [u8] {
        self.buf
    }
}
