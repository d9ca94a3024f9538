//! Fragmentation and reassembly of messages over a size-limited transport
//!
//! Messages are serialized to JSON and wrapped in a [`Frame`]. Payloads longer
//! than the configured fragment size are cut into indexed slices that the
//! receiver buffers per `(sender, fragment_id)` until every slice has arrived.
//! Frames themselves travel as bincode.
//!
//! The largest message either side handles is [`MAX_MESSAGE_SIZE`] bytes of
//! encoded JSON, whatever the fragment size.

use crate::protocol::Message;
use crate::PeerId;
use bincode::{deserialize, serialize};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Largest encoded message, in bytes, that is sent or reassembled (16 MiB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    Full {
        data: Vec<u8>,
    },
    Fragment {
        fragment_id: u64,
        fragment_index: u32,
        total_fragments: u32,
        data: Vec<u8>,
    },
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serialize(self).map_err(|e| CodecError::Frame(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        deserialize(bytes).map_err(|e| CodecError::Frame(e.to_string()))
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self, Frame::Fragment { .. })
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid message payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed frame: {0}")]
    Frame(String),
    #[error("fragment {index} out of range for {total} fragments")]
    IndexOutOfRange { index: u32, total: u32 },
    #[error("fragment set {fragment_id} declared {expected} fragments, got {got}")]
    TotalMismatch {
        fragment_id: u64,
        expected: u32,
        got: u32,
    },
    #[error("fragment count {0} exceeds limit")]
    TooManyFragments(u32),
    #[error("message of {0} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit")]
    MessageTooLarge(usize),
}

/// Outcome of feeding one frame to the receiver
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Complete(Message),
    Incomplete,
}

/// Reassembly buffer for one in-flight fragmented message
#[derive(Debug)]
struct FragmentSet {
    total: u32,
    slices: BTreeMap<u32, Vec<u8>>,
    bytes: usize,
    first_seen: Instant,
}

impl FragmentSet {
    fn new(total: u32, now: Instant) -> Self {
        Self {
            total,
            slices: BTreeMap::new(),
            bytes: 0,
            first_seen: now,
        }
    }

    /// Stores a slice, replacing a duplicate; returns false for a duplicate
    fn insert(&mut self, index: u32, data: Vec<u8>) -> bool {
        self.bytes += data.len();
        match self.slices.insert(index, data) {
            Some(previous) => {
                self.bytes -= previous.len();
                false
            }
            None => true,
        }
    }

    fn is_complete(&self) -> bool {
        self.slices.len() == self.total as usize
    }

    fn assemble(self) -> Vec<u8> {
        self.slices.into_values().flatten().collect()
    }
}

pub struct FragmentCodec {
    fragment_size: usize,
    fragment_ttl: Duration,
    next_fragment_id: u64,
    pending: HashMap<(PeerId, u64), FragmentSet>,
}

impl FragmentCodec {
    pub fn new(fragment_size: usize, fragment_ttl: Duration) -> Self {
        Self {
            fragment_size: fragment_size.max(1),
            fragment_ttl,
            next_fragment_id: 1,
            pending: HashMap::new(),
        }
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Serializes a message into the frames to hand to the transport
    pub fn encode(&mut self, message: &Message) -> Result<Vec<Frame>, CodecError> {
        let payload = serde_json::to_vec(message)?;
        self.split(payload)
    }

    /// Cuts an already encoded payload into frames
    ///
    /// Payloads above [`MAX_MESSAGE_SIZE`] are refused here, since no receiver
    /// would reassemble them.
    pub fn split(&mut self, payload: Vec<u8>) -> Result<Vec<Frame>, CodecError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(payload.len()));
        }
        if payload.len() <= self.fragment_size {
            return Ok(vec![Frame::Full { data: payload }]);
        }

        let fragment_id = self.next_fragment_id;
        self.next_fragment_id += 1;

        let chunks: Vec<&[u8]> = payload.chunks(self.fragment_size).collect();
        let total_fragments = chunks.len() as u32;
        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| Frame::Fragment {
                fragment_id,
                fragment_index: index as u32,
                total_fragments,
                data: chunk.to_vec(),
            })
            .collect())
    }

    /// Feeds a frame received from `sender`; fragment slices are buffered
    pub fn decode(
        &mut self,
        frame: Frame,
        sender: PeerId,
        now: Instant,
    ) -> Result<Decoded, CodecError> {
        self.evict_expired(now);

        match frame {
            Frame::Full { data } => Ok(Decoded::Complete(serde_json::from_slice(&data)?)),
            Frame::Fragment {
                fragment_id,
                fragment_index,
                total_fragments,
                data,
            } => {
                if total_fragments == 0 || fragment_index >= total_fragments {
                    return Err(CodecError::IndexOutOfRange {
                        index: fragment_index,
                        total: total_fragments,
                    });
                }
                // Every slice carries at least one byte
                if total_fragments as usize > MAX_MESSAGE_SIZE {
                    return Err(CodecError::TooManyFragments(total_fragments));
                }

                let key = (sender, fragment_id);
                let set = self
                    .pending
                    .entry(key)
                    .or_insert_with(|| FragmentSet::new(total_fragments, now));

                if set.total != total_fragments {
                    return Err(CodecError::TotalMismatch {
                        fragment_id,
                        expected: set.total,
                        got: total_fragments,
                    });
                }

                if !set.insert(fragment_index, data) {
                    debug!(
                        "Duplicate fragment {}/{} of {} from {}",
                        fragment_index, total_fragments, fragment_id, sender
                    );
                }
                if set.bytes > MAX_MESSAGE_SIZE {
                    let bytes = set.bytes;
                    self.pending.remove(&key);
                    return Err(CodecError::MessageTooLarge(bytes));
                }

                if !set.is_complete() {
                    return Ok(Decoded::Incomplete);
                }

                let payload = match self.pending.remove(&key) {
                    Some(set) => set.assemble(),
                    None => return Ok(Decoded::Incomplete),
                };
                Ok(Decoded::Complete(serde_json::from_slice(&payload)?))
            }
        }
    }

    /// Parses raw transport bytes and feeds the frame
    pub fn decode_bytes(
        &mut self,
        bytes: &[u8],
        sender: PeerId,
        now: Instant,
    ) -> Result<Decoded, CodecError> {
        let frame = Frame::from_bytes(bytes)?;
        self.decode(frame, sender, now)
    }

    /// Drops fragment sets that have waited longer than the TTL
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let ttl = self.fragment_ttl;
        let before = self.pending.len();
        self.pending.retain(|(sender, fragment_id), set| {
            let expired = now.saturating_duration_since(set.first_seen) > ttl;
            if expired {
                warn!(
                    "Evicting incomplete message {} from {} ({}/{} fragments)",
                    fragment_id,
                    sender,
                    set.slices.len(),
                    set.total
                );
            }
            !expired
        });
        before - self.pending.len()
    }

    pub fn pending_sets(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn codec(size: usize) -> FragmentCodec {
        FragmentCodec::new(size, Duration::from_secs(10))
    }

    fn scene_message(objects: usize) -> Message {
        use crate::protocol::{ObjectRecord, SceneData};
        Message::SceneSync {
            scene_name: "TetrisScene".to_string(),
            scene_data: SceneData {
                objects: (1..=objects as u64)
                    .map(|id| ObjectRecord {
                        class_name: "Block".to_string(),
                        object_name: format!("Block{}", id),
                        network_id: id,
                        steam_id: Some(76561198000000000 + id),
                        parent_id: if id == 1 { None } else { Some(1) },
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn test_small_message_is_single_frame() {
        let mut codec = codec(850);
        let frames = codec.encode(&Message::ForceSync).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].is_fragment());

        let decoded = codec.decode(frames[0].clone(), 1, Instant::now()).unwrap();
        assert_eq!(decoded, Decoded::Complete(Message::ForceSync));
    }

    #[test]
    fn test_oversized_payload_fragment_count() {
        let mut codec = codec(850);
        let frames = codec.split(vec![b'x'; 5000]).unwrap();
        assert_eq!(frames.len(), 6);

        for (expected_index, frame) in frames.iter().enumerate() {
            match frame {
                Frame::Fragment {
                    fragment_index,
                    total_fragments,
                    data,
                    ..
                } => {
                    assert_eq!(*fragment_index as usize, expected_index);
                    assert_eq!(*total_fragments, 6);
                    let expected_len = if expected_index == 5 { 750 } else { 850 };
                    assert_eq!(data.len(), expected_len);
                }
                Frame::Full { .. } => panic!("Expected fragment frame"),
            }
        }
    }

    #[test]
    fn test_scrambled_reassembly() {
        let message = scene_message(80);
        let mut sender = codec(64);
        let mut frames = sender.encode(&message).unwrap();
        assert!(frames.len() > 2);
        frames.shuffle(&mut rand::thread_rng());

        let mut receiver = codec(64);
        let now = Instant::now();
        let last = frames.pop().unwrap();
        for frame in frames {
            assert_eq!(receiver.decode(frame, 9, now).unwrap(), Decoded::Incomplete);
        }
        assert_eq!(receiver.pending_sets(), 1);
        assert_eq!(
            receiver.decode(last, 9, now).unwrap(),
            Decoded::Complete(message)
        );
        assert_eq!(receiver.pending_sets(), 0);
    }

    #[test]
    fn test_fragment_size_one() {
        let message = Message::RemoveObject { network_id: 12 };
        let mut sender = codec(1);
        let frames = sender.encode(&message).unwrap();
        let encoded_len = serde_json::to_vec(&message).unwrap().len();
        assert_eq!(frames.len(), encoded_len);

        let mut receiver = codec(1);
        let now = Instant::now();
        let mut result = Decoded::Incomplete;
        for frame in frames {
            result = receiver.decode(frame, 3, now).unwrap();
        }
        assert_eq!(result, Decoded::Complete(message));
    }

    #[test]
    fn test_fragment_size_one_large_scene() {
        let message = scene_message(60);
        let mut sender = codec(1);
        let frames = sender.encode(&message).unwrap();
        assert!(frames.len() > 4096);

        let mut receiver = codec(1);
        let now = Instant::now();
        let mut result = Decoded::Incomplete;
        for frame in frames {
            result = receiver.decode(frame, 3, now).unwrap();
        }
        assert_eq!(result, Decoded::Complete(message));
        assert_eq!(receiver.pending_sets(), 0);
    }

    #[test]
    fn test_split_at_message_size_limit() {
        let mut sender = codec(MAX_MESSAGE_SIZE);
        let frames = sender.split(vec![b'0'; MAX_MESSAGE_SIZE]).unwrap();
        assert_eq!(frames.len(), 1);

        assert!(matches!(
            sender.split(vec![b'0'; MAX_MESSAGE_SIZE + 1]),
            Err(CodecError::MessageTooLarge(size)) if size == MAX_MESSAGE_SIZE + 1
        ));
    }

    #[test]
    fn test_reassembly_over_byte_budget() {
        let mut receiver = codec(850);
        let now = Instant::now();
        let half = MAX_MESSAGE_SIZE / 2 + 1;
        let slice = |index| Frame::Fragment {
            fragment_id: 9,
            fragment_index: index,
            total_fragments: 3,
            data: vec![b'0'; half],
        };

        assert_eq!(receiver.decode(slice(0), 1, now).unwrap(), Decoded::Incomplete);
        assert!(matches!(
            receiver.decode(slice(1), 1, now),
            Err(CodecError::MessageTooLarge(_))
        ));
        assert_eq!(receiver.pending_sets(), 0);
    }

    #[test]
    fn test_zero_fragment_size_is_clamped() {
        assert_eq!(codec(0).fragment_size(), 1);
    }

    #[test]
    fn test_consecutive_sends_get_distinct_ids() {
        let mut codec = codec(8);
        let first = codec.split(vec![1; 20]).unwrap();
        let second = codec.split(vec![2; 20]).unwrap();

        let id_of = |frame: &Frame| match frame {
            Frame::Fragment { fragment_id, .. } => *fragment_id,
            Frame::Full { .. } => panic!("Expected fragment frame"),
        };
        assert_ne!(id_of(&first[0]), id_of(&second[0]));
    }

    #[test]
    fn test_same_fragment_id_from_two_senders() {
        let message = scene_message(10);
        let mut alice = codec(32);
        let mut bob = codec(32);
        let alice_frames = alice.encode(&message).unwrap();
        let bob_frames = bob.encode(&message).unwrap();

        let mut receiver = codec(32);
        let now = Instant::now();
        let mut completed = 0;
        for (a, b) in alice_frames.into_iter().zip(bob_frames) {
            if let Decoded::Complete(_) = receiver.decode(a, 100, now).unwrap() {
                completed += 1;
            }
            if let Decoded::Complete(_) = receiver.decode(b, 200, now).unwrap() {
                completed += 1;
            }
        }
        assert_eq!(completed, 2);
    }

    #[test]
    fn test_subset_never_completes() {
        let message = scene_message(20);
        let mut sender = codec(40);
        let mut frames = sender.encode(&message).unwrap();
        frames.remove(1);

        let mut receiver = codec(40);
        let now = Instant::now();
        for frame in frames {
            assert_eq!(receiver.decode(frame, 1, now).unwrap(), Decoded::Incomplete);
        }
    }

    #[test]
    fn test_duplicate_fragment_does_not_complete() {
        let mut sender = codec(4);
        let frames = sender
            .split(serde_json::to_vec(&Message::ForceSync).unwrap())
            .unwrap();
        let mut receiver = codec(4);
        let now = Instant::now();

        for _ in 0..frames.len() {
            let result = receiver.decode(frames[0].clone(), 1, now).unwrap();
            assert_eq!(result, Decoded::Incomplete);
        }
    }

    #[test]
    fn test_index_out_of_range() {
        let mut receiver = codec(850);
        let frame = Frame::Fragment {
            fragment_id: 1,
            fragment_index: 3,
            total_fragments: 3,
            data: vec![0],
        };
        let result = receiver.decode(frame, 1, Instant::now());
        assert!(matches!(
            result,
            Err(CodecError::IndexOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn test_total_mismatch() {
        let mut receiver = codec(850);
        let now = Instant::now();
        let first = Frame::Fragment {
            fragment_id: 5,
            fragment_index: 0,
            total_fragments: 3,
            data: vec![0],
        };
        let second = Frame::Fragment {
            fragment_id: 5,
            fragment_index: 1,
            total_fragments: 4,
            data: vec![0],
        };
        assert_eq!(receiver.decode(first, 1, now).unwrap(), Decoded::Incomplete);
        assert!(matches!(
            receiver.decode(second, 1, now),
            Err(CodecError::TotalMismatch { .. })
        ));
    }

    #[test]
    fn test_hostile_fragment_total() {
        let mut receiver = codec(850);
        let frame = Frame::Fragment {
            fragment_id: 1,
            fragment_index: 0,
            total_fragments: u32::MAX,
            data: vec![],
        };
        assert!(matches!(
            receiver.decode(frame, 1, Instant::now()),
            Err(CodecError::TooManyFragments(_))
        ));
        assert_eq!(receiver.pending_sets(), 0);
    }

    #[test]
    fn test_expired_sets_are_evicted() {
        let mut sender = codec(16);
        let frames = sender.encode(&scene_message(3)).unwrap();
        let mut receiver = FragmentCodec::new(16, Duration::from_secs(2));
        let start = Instant::now();

        receiver.decode(frames[0].clone(), 1, start).unwrap();
        assert_eq!(receiver.pending_sets(), 1);

        assert_eq!(receiver.evict_expired(start + Duration::from_secs(1)), 0);
        assert_eq!(receiver.evict_expired(start + Duration::from_secs(3)), 1);
        assert_eq!(receiver.pending_sets(), 0);
    }

    #[test]
    fn test_malformed_bytes() {
        let mut receiver = codec(850);
        let result = receiver.decode_bytes(&[0xFF, 0x01], 1, Instant::now());
        assert!(matches!(result, Err(CodecError::Frame(_))));

        let garbage = Frame::Full {
            data: b"{not json".to_vec(),
        }
        .to_bytes()
        .unwrap();
        let result = receiver.decode_bytes(&garbage, 1, Instant::now());
        assert!(matches!(result, Err(CodecError::Json(_))));
    }

    #[test]
    fn test_frame_bytes_roundtrip() {
        let mut sender = codec(850);
        let frames = sender.encode(&Message::RequestSceneSync { sender_id: 42 }).unwrap();
        let bytes = frames[0].to_bytes().unwrap();

        let mut receiver = codec(850);
        let decoded = receiver.decode_bytes(&bytes, 42, Instant::now()).unwrap();
        assert_eq!(
            decoded,
            Decoded::Complete(Message::RequestSceneSync { sender_id: 42 })
        );
    }
}
