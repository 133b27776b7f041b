use std::borrow::Cow;

use super::codec::ByteWriter;
use super::connection::MessageSink;
use super::protocol::MessageKind;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("payload of {size} bytes does not fit under the {limit}-byte ceiling")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("{kind:?} message of {size} bytes exceeds the {limit}-byte transport maximum")]
    MessageTooLarge {
        kind: MessageKind,
        size: usize,
        limit: usize,
    },
}

/// Chunks of at most `max_size` bytes, paired with "is last chunk".
/// An empty payload still yields one (empty) final chunk.
pub fn split_message(payload: &[u8], max_size: usize) -> impl Iterator<Item = (&[u8], bool)> {
    let max_size = max_size.max(1);
    let count = payload.len().div_ceil(max_size).max(1);
    (0..count).map(move |i| {
        let start = i * max_size;
        let end = (start + max_size).min(payload.len());
        (&payload[start..end], i + 1 == count)
    })
}

/// Sends `payload` as one message, failing if it is over `max_size`.
pub fn send_bounded_message(
    sink: &mut (impl MessageSink + ?Sized),
    kind: MessageKind,
    payload: &[u8],
    max_size: usize,
) -> Result<(), FramingError> {
    if payload.len() > max_size {
        log::error!(
            "Cannot send {:?}: {} bytes exceeds maximum of {}",
            kind,
            payload.len(),
            max_size
        );
        return Err(FramingError::MessageTooLarge {
            kind,
            size: payload.len(),
            limit: max_size,
        });
    }
    sink.send_message(kind, payload, kind.delivery());
    Ok(())
}

/// Sends `payload` split over as many messages as needed. Every chunk but the
/// last is tagged with the incomplete variant of `kind`.
pub fn send_large_message(
    sink: &mut (impl MessageSink + ?Sized),
    kind: MessageKind,
    payload: &[u8],
    max_size: usize,
) -> Result<(), FramingError> {
    let Some(incomplete) = kind.incomplete() else {
        return send_bounded_message(sink, kind, payload, max_size);
    };

    for (chunk, is_last) in split_message(payload, max_size) {
        let chunk_kind = if is_last { kind } else { incomplete };
        sink.send_message(chunk_kind, chunk, chunk_kind.delivery());
    }
    Ok(())
}

/// Receiver side of [`send_large_message`], one per logical channel.
#[derive(Debug, Default)]
pub struct MessageReassembler {
    buffer: Vec<u8>,
}

impl MessageReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the whole message once the final chunk arrives.
    pub fn push<'a>(&'a mut self, chunk: &'a [u8], is_last: bool) -> Option<Cow<'a, [u8]>> {
        if !is_last {
            self.buffer.extend_from_slice(chunk);
            return None;
        }
        if self.buffer.is_empty() {
            return Some(Cow::Borrowed(chunk));
        }
        self.buffer.extend_from_slice(chunk);
        Some(Cow::Owned(std::mem::take(&mut self.buffer)))
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Packs independent payloads behind a shared header, flushing whenever the
/// next payload would push the message past `ceiling`.
#[derive(Debug)]
pub struct MessageBatcher {
    kind: MessageKind,
    ceiling: usize,
    header_len: usize,
    buffer: ByteWriter,
    payload_count: usize,
    messages_sent: usize,
}

impl MessageBatcher {
    pub fn new(kind: MessageKind, ceiling: usize, header: &[u8]) -> Self {
        let mut buffer = ByteWriter::with_capacity(ceiling);
        buffer.write_bytes(header);
        Self {
            kind,
            ceiling,
            header_len: header.len(),
            buffer,
            payload_count: 0,
            messages_sent: 0,
        }
    }

    pub fn push(
        &mut self,
        sink: &mut (impl MessageSink + ?Sized),
        payload: &[u8],
    ) -> Result<(), FramingError> {
        if self.header_len + payload.len() > self.ceiling {
            log::error!(
                "{:?} payload of {} bytes cannot fit a {}-byte message",
                self.kind,
                payload.len(),
                self.ceiling
            );
            return Err(FramingError::PayloadTooLarge {
                size: payload.len(),
                limit: self.ceiling,
            });
        }

        if self.buffer.len() + payload.len() > self.ceiling {
            self.flush(sink);
        }
        self.buffer.write_bytes(payload);
        self.payload_count += 1;
        Ok(())
    }

    pub fn flush(&mut self, sink: &mut (impl MessageSink + ?Sized)) {
        if self.payload_count == 0 {
            return;
        }
        sink.send_message(self.kind, self.buffer.as_slice(), self.kind.delivery());
        self.buffer.truncate(self.header_len);
        self.payload_count = 0;
        self.messages_sent += 1;
    }

    /// Flushes the tail and returns how many messages were sent in total.
    pub fn finish(mut self, sink: &mut (impl MessageSink + ?Sized)) -> usize {
        self.flush(sink);
        self.messages_sent
    }
}
