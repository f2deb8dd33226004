//! Block compressor (spec §4.4). The codec itself is an external
//! collaborator; this module defines the narrow interface the writer core
//! depends on and a couple of concrete implementations so the crate is
//! self-contained and testable.

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;

/// The compression kind recorded on a block's skip node, and persisted in
/// the stripe footer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionKind {
    None = 0,
    Lz = 1,
}

impl Default for CompressionKind {
    fn default() -> Self {
        CompressionKind::None
    }
}

/// The pluggable compression collaborator: attempt to compress `input` into
/// `scratch`, returning whether the compressed form should be kept. A codec
/// may refuse for any reason (not worthwhile, unsupported input); that is
/// not an error (spec §7).
pub trait Codec {
    fn requested_kind(&self) -> CompressionKind;
    fn try_compress(&self, input: &[u8], scratch: &mut Vec<u8>) -> bool;
}

/// Never compresses. Used when the session is configured with
/// `CompressionKind::None`, and as the "pass-through" codec referenced by
/// property P7.
pub struct NoneCodec;

impl Codec for NoneCodec {
    fn requested_kind(&self) -> CompressionKind {
        CompressionKind::None
    }

    fn try_compress(&self, _input: &[u8], _scratch: &mut Vec<u8>) -> bool {
        false
    }
}

/// DEFLATE-backed codec standing in for the host's "LZ" compressor. Only
/// keeps the compressed form when it is strictly smaller, per spec §4.4.
pub struct DeflateCodec {
    pub level: Compression,
}

impl Default for DeflateCodec {
    fn default() -> Self {
        DeflateCodec {
            level: Compression::default(),
        }
    }
}

impl Codec for DeflateCodec {
    fn requested_kind(&self) -> CompressionKind {
        CompressionKind::Lz
    }

    fn try_compress(&self, input: &[u8], scratch: &mut Vec<u8>) -> bool {
        scratch.clear();

        let mut encoder = DeflateEncoder::new(scratch, self.level);
        if encoder.write_all(input).is_err() {
            return false;
        }
        if encoder.finish().is_err() {
            return false;
        }

        scratch.len() < input.len()
    }
}

/// Compresses `input` with `codec`, writing the chosen bytes (compressed or
/// original) into `scratch` and returning the kind actually used. Mirrors
/// `CompressBuffer`'s call site in `SerializeBlockData`.
pub fn compress_block(codec: &dyn Codec, input: &[u8], scratch: &mut Vec<u8>) -> CompressionKind {
    if codec.requested_kind() == CompressionKind::None {
        return CompressionKind::None;
    }

    if codec.try_compress(input, scratch) {
        codec.requested_kind()
    } else {
        CompressionKind::None
    }
}
