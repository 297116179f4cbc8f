//! Buffering stream decoder: turns an incoming byte stream into a sequence of [`Message`]s.
//!
//! Kept almost verbatim from the teacher's `decoder.rs` — same `serde_json::Deserializer::
//! from_reader` + `StreamDeserializer::byte_offset()` draining trick — only the decoded type
//! changed, from the teacher's binary `Envelope` to this crate's JSON-array [`Message`].

use std::marker::PhantomData;

use serde::Deserialize;

use crate::message::Message;

/// Message stream decoder.
///
/// Used to turn a byte stream (e.g. from a WebSocket frame) into [`Message`]s.
#[derive(Debug)]
pub struct Decoder<D = Message> {
    unparsed: Vec<u8>,
    item: PhantomData<D>,
}

impl<D> From<Vec<u8>> for Decoder<D> {
    fn from(unparsed: Vec<u8>) -> Self {
        Self {
            unparsed,
            item: PhantomData,
        }
    }
}

impl<'de, D: Deserialize<'de>> Decoder<D> {
    /// Create a new stream decoder.
    pub fn new(capacity: usize) -> Self {
        Self {
            unparsed: Vec::with_capacity(capacity),
            item: PhantomData,
        }
    }

    /// Input bytes into the decoder.
    pub fn input(&mut self, bytes: &[u8]) {
        self.unparsed.extend_from_slice(bytes);
    }

    /// Decode and return the next message. Returns [`None`] if nothing was decoded.
    pub fn decode_next(&mut self) -> Result<Option<D>, serde_json::Error> {
        let mut de = serde_json::Deserializer::from_reader(self.unparsed.as_slice()).into_iter();

        match de.next() {
            Some(Ok(msg)) => {
                self.unparsed.drain(..de.byte_offset());
                Ok(Some(msg))
            }
            Some(Err(err)) if err.is_eof() => Ok(None),

            result => result.transpose(),
        }
    }
}

impl<'de, D: Deserialize<'de>> Iterator for Decoder<D> {
    type Item = Result<D, serde_json::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next().transpose()
    }
}
