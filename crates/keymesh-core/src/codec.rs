//! Deterministic encodings for wire and stored data.
//!
//! Every multi-byte integer is big-endian, both on the wire and in signing
//! buffers; a canonical serialization used as a signing input is byte-exact
//! across platforms. Hex is lowercase, base58 uses the Bitcoin alphabet,
//! base64 is RFC 4648.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::KeymeshError;

// ── ByteWriter ───────────────────────────────────────────────────────────────

/// Appends fixed-width big-endian integers and raw slices to a growable
/// buffer. The append order defines the canonical layout.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// `[len:u16][bytes]`.
    pub fn put_prefixed_u16(&mut self, v: &[u8]) -> &mut Self {
        self.put_u16(v.len() as u16);
        self.put_bytes(v)
    }

    /// `[len:u32][bytes]`.
    pub fn put_prefixed_u32(&mut self, v: &[u8]) -> &mut Self {
        self.put_u32(v.len() as u32);
        self.put_bytes(v)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ── ByteReader ───────────────────────────────────────────────────────────────

/// Consumes fixed-width big-endian integers and raw slices from a buffer.
/// Reading past the end is an `InvalidArgument` error, never a panic;
/// truncated frames come off the network.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], KeymeshError> {
        if self.pos + n > self.buf.len() {
            return Err(KeymeshError::InvalidArgument("truncated frame".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn take_u8(&mut self) -> Result<u8, KeymeshError> {
        Ok(self.take(1)?[0])
    }

    pub fn take_u16(&mut self) -> Result<u16, KeymeshError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn take_u32(&mut self) -> Result<u32, KeymeshError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn take_u64(&mut self) -> Result<u64, KeymeshError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], KeymeshError> {
        self.take(n)
    }

    /// `[len:u16][bytes]`.
    pub fn take_prefixed_u16(&mut self) -> Result<&'a [u8], KeymeshError> {
        let n = self.take_u16()? as usize;
        self.take(n)
    }

    /// `[len:u32][bytes]`.
    pub fn take_prefixed_u32(&mut self) -> Result<&'a [u8], KeymeshError> {
        let n = self.take_u32()? as usize;
        self.take(n)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

// ── Typed framing ────────────────────────────────────────────────────────────

/// `[len:u64][payload][len:u64][signature]`.
pub fn encode_framed(payload: &[u8], signature: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(16 + payload.len() + signature.len());
    w.put_u64(payload.len() as u64);
    w.put_bytes(payload);
    w.put_u64(signature.len() as u64);
    w.put_bytes(signature);
    w.into_bytes()
}

/// Inverse of [`encode_framed`]; rejects truncation and trailing garbage.
pub fn decode_framed(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>), KeymeshError> {
    let mut r = ByteReader::new(bytes);
    let plen = r.take_u64()? as usize;
    let payload = r.take_bytes(plen)?.to_vec();
    let slen = r.take_u64()? as usize;
    let signature = r.take_bytes(slen)?.to_vec();
    if !r.is_empty() {
        return Err(KeymeshError::InvalidArgument(
            "trailing bytes after frame".into(),
        ));
    }
    Ok((payload, signature))
}

// ── Text encodings ───────────────────────────────────────────────────────────

/// Lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, KeymeshError> {
    hex::decode(s).map_err(|_| KeymeshError::InvalidArgument("invalid hex".into()))
}

/// Base58, Bitcoin alphabet.
pub fn to_base58(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

pub fn from_base58(s: &str) -> Result<Vec<u8>, KeymeshError> {
    bs58::decode(s)
        .into_vec()
        .map_err(|_| KeymeshError::InvalidArgument("invalid base58".into()))
}

/// Base64, RFC 4648 standard alphabet with padding.
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn from_base64(s: &str) -> Result<Vec<u8>, KeymeshError> {
    BASE64
        .decode(s)
        .map_err(|_| KeymeshError::InvalidArgument("invalid base64".into()))
}
