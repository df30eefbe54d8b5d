// src/morse/mod.rs  —  Encoder, Decoder, Timing, shared Morse table
pub mod decoder;
pub mod encoder;
pub mod table;
pub mod timing;

pub use decoder::{Decoder, DecoderConfig, DecodedMessage, DecodedToken, DecoderOutput};
pub use encoder::{encode, render, render_blocks, ToneSeq};
pub use timing::Timing;
