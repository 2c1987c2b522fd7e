use bytes::Bytes;
use tokio::sync::mpsc;

/// A single unit of opaque audio data with its position in the stream
///
/// Sequence numbers start at 1 and are assigned at capture time for outbound
/// audio and at receipt time for inbound audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    sequence: u64,
    data: Bytes,
}

impl AudioChunk {
    pub fn new(sequence: u64, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            data: data.into(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Monotonic sequence number source
#[derive(Debug)]
pub struct Sequencer {
    next: u64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Stamp a payload with the next sequence number
    pub fn stamp(&mut self, data: impl Into<Bytes>) -> AudioChunk {
        let chunk = AudioChunk::new(self.next, data);
        self.next += 1;
        chunk
    }

    /// Number of chunks stamped so far
    pub fn issued(&self) -> u64 {
        self.next - 1
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half handed to capture backends
///
/// Stamps every payload with its capture sequence number before queueing it,
/// so backends never deal with ordering themselves.
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::Sender<AudioChunk>,
    sequencer: Sequencer,
}

impl ChunkSender {
    /// Queue a captured payload
    ///
    /// Waits for queue capacity. Returns `false` once the consumer is gone.
    pub async fn send(&mut self, data: impl Into<Bytes>) -> bool {
        let chunk = self.sequencer.stamp(data);
        self.tx.send(chunk).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn sent(&self) -> u64 {
        self.sequencer.issued()
    }
}

/// Create a bounded chunk queue between a capture backend and its consumer
pub fn chunk_channel(capacity: usize) -> (ChunkSender, mpsc::Receiver<AudioChunk>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChunkSender {
            tx,
            sequencer: Sequencer::new(),
        },
        rx,
    )
}
