/*!
Shared primitives for the graven image codecs.

This crate contains the pieces that more than one decoder needs: a
bounds-checked big-endian byte [`Reader`](byte::Reader), a bit-level
[`BitReader`](bit::BitReader), and the MQ arithmetic decoder
([`mq`]) shared by the JBIG2 and JPEG 2000 decoders.

# Safety
This crate forbids unsafe code via a crate-level attribute.
*/

#![forbid(unsafe_code)]

pub mod bit;
pub mod byte;
pub mod mq;
