//! Sample codecs used on the telephony leg.
//!
//! Both legs of a call exchange G.711 μ-law at 8 kHz, so the bridge relays
//! audio without transcoding. The codec is still needed wherever linear PCM
//! has to be produced or inspected (tests, recordings, level analysis).

pub mod mulaw;

pub use mulaw::{
    MULAW_BIAS, MULAW_CLIP, MULAW_SILENCE, decode, decode_samples, decode_to_pcm16le, encode,
    encode_pcm16le, encode_samples,
};
