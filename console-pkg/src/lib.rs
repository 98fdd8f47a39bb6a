//! Console package container
//!
//! A package is a 4-byte signature magic followed by a zstd-compressed tar
//! stream. The first tar member is the JSON package header; the rest is the
//! payload tree, rooted at `Root/`.

pub mod codec;
pub mod package;

pub use codec::{ZstdCodec, ZstdOptions};
pub use package::{
    AudioInfo, License, Package, PackageBuilder, PackageError, PackageHeader, SignatureType, HEADER_MEMBER, PAYLOAD_ROOT,
};
