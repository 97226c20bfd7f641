//! Deterministic binary (de)serialization of the on-disk snapshot (spec.md
//! §6, §4.6; component C7).
//!
//! Every format below is a length-prefixed record stream with a leading
//! `u16` format version (spec.md's `learning.bin` already specifies one;
//! this generalizes the practice to the other three files per
//! SPEC_FULL.md §4). All integers are little-endian.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::storage::backend::StorageError;
use crate::VolumeId;

type Result<T> = std::result::Result<T, StorageError>;

const FORMAT_VERSION: u16 = 1;

fn corrupt(what: &str) -> StorageError {
    StorageError::Corruption(what.to_string())
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_u32::<LittleEndian>(s.len() as u32).unwrap();
    buf.extend_from_slice(s.as_bytes());
}

fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated string length"))? as usize;
    let mut bytes = vec![0u8; len];
    cur.read_exact(&mut bytes).map_err(|_| corrupt("truncated string bytes"))?;
    String::from_utf8(bytes).map_err(|_| corrupt("invalid utf-8"))
}

fn check_version(cur: &mut Cursor<&[u8]>) -> Result<u16> {
    cur.read_u16::<LittleEndian>().map_err(|_| corrupt("missing version header"))
}

// ============================================================================
// volumes.bin
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeRecord {
    pub id: VolumeId,
    pub text: String,
    pub embedding: Vec<f32>,
    pub timestamp_ms: u64,
    pub metadata: BTreeMap<String, String>,
}

pub fn encode_volumes(records: &[VolumeRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
    for r in records {
        write_string(&mut buf, &r.id);
        write_string(&mut buf, &r.text);
        buf.write_u32::<LittleEndian>(r.embedding.len() as u32).unwrap();
        for x in &r.embedding {
            buf.write_f32::<LittleEndian>(*x).unwrap();
        }
        buf.write_u64::<LittleEndian>(r.timestamp_ms).unwrap();
        buf.write_u32::<LittleEndian>(r.metadata.len() as u32).unwrap();
        for (k, v) in &r.metadata {
            write_string(&mut buf, k);
            write_string(&mut buf, v);
        }
    }
    buf
}

pub fn decode_volumes(bytes: &[u8]) -> Result<Vec<VolumeRecord>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut cur = Cursor::new(bytes);
    let _version = check_version(&mut cur)?;
    let mut out = Vec::new();
    let len = bytes.len() as u64;
    while cur.position() < len {
        let id = read_string(&mut cur)?;
        let text = read_string(&mut cur)?;
        let dim = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated dim"))? as usize;
        let mut embedding = Vec::with_capacity(dim);
        for _ in 0..dim {
            embedding.push(cur.read_f32::<LittleEndian>().map_err(|_| corrupt("truncated embedding"))?);
        }
        let timestamp_ms = cur.read_u64::<LittleEndian>().map_err(|_| corrupt("truncated timestamp"))?;
        let meta_count = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated meta count"))?;
        let mut metadata = BTreeMap::new();
        for _ in 0..meta_count {
            let k = read_string(&mut cur)?;
            let v = read_string(&mut cur)?;
            metadata.insert(k, v);
        }
        out.push(VolumeRecord { id, text, embedding, timestamp_ms, metadata });
    }
    Ok(out)
}

// ============================================================================
// access.bin
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub id: VolumeId,
    pub hits: u32,
    pub last_hit_ms: u64,
}

pub fn encode_access(records: &[AccessRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
    for r in records {
        write_string(&mut buf, &r.id);
        buf.write_u32::<LittleEndian>(r.hits).unwrap();
        buf.write_u64::<LittleEndian>(r.last_hit_ms).unwrap();
    }
    buf
}

pub fn decode_access(bytes: &[u8]) -> Result<Vec<AccessRecord>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut cur = Cursor::new(bytes);
    let _version = check_version(&mut cur)?;
    let mut out = Vec::new();
    let len = bytes.len() as u64;
    while cur.position() < len {
        let id = read_string(&mut cur)?;
        let hits = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated hits"))?;
        let last_hit_ms = cur.read_u64::<LittleEndian>().map_err(|_| corrupt("truncated last_hit"))?;
        out.push(AccessRecord { id, hits, last_hit_ms });
    }
    Ok(out)
}

// ============================================================================
// topics.bin
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicsSnapshot {
    /// `(topic, parent, children)`
    pub topics: Vec<(String, Option<String>, Vec<String>)>,
    /// `(alias, canonical)`
    pub aliases: Vec<(String, String)>,
    /// `(volume_id, topic)`
    pub volume_map: Vec<(VolumeId, String)>,
}

pub fn encode_topics(snapshot: &TopicsSnapshot) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
    buf.write_u32::<LittleEndian>(snapshot.topics.len() as u32).unwrap();
    for (topic, parent, children) in &snapshot.topics {
        write_string(&mut buf, topic);
        match parent {
            Some(p) => {
                buf.write_u8(1).unwrap();
                write_string(&mut buf, p);
            }
            None => buf.write_u8(0).unwrap(),
        }
        buf.write_u32::<LittleEndian>(children.len() as u32).unwrap();
        for c in children {
            write_string(&mut buf, c);
        }
    }
    buf.write_u32::<LittleEndian>(snapshot.aliases.len() as u32).unwrap();
    for (alias, canonical) in &snapshot.aliases {
        write_string(&mut buf, alias);
        write_string(&mut buf, canonical);
    }
    buf.write_u32::<LittleEndian>(snapshot.volume_map.len() as u32).unwrap();
    for (id, topic) in &snapshot.volume_map {
        write_string(&mut buf, id);
        write_string(&mut buf, topic);
    }
    buf
}

pub fn decode_topics(bytes: &[u8]) -> Result<TopicsSnapshot> {
    if bytes.is_empty() {
        return Ok(TopicsSnapshot::default());
    }
    let mut cur = Cursor::new(bytes);
    let _version = check_version(&mut cur)?;

    let topic_count = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated topic count"))?;
    let mut topics = Vec::with_capacity(topic_count as usize);
    for _ in 0..topic_count {
        let topic = read_string(&mut cur)?;
        let has_parent = cur.read_u8().map_err(|_| corrupt("truncated parent flag"))?;
        let parent = if has_parent == 1 { Some(read_string(&mut cur)?) } else { None };
        let child_count = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated child count"))?;
        let mut children = Vec::with_capacity(child_count as usize);
        for _ in 0..child_count {
            children.push(read_string(&mut cur)?);
        }
        topics.push((topic, parent, children));
    }

    let alias_count = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated alias count"))?;
    let mut aliases = Vec::with_capacity(alias_count as usize);
    for _ in 0..alias_count {
        aliases.push((read_string(&mut cur)?, read_string(&mut cur)?));
    }

    let volume_count = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated volume map count"))?;
    let mut volume_map = Vec::with_capacity(volume_count as usize);
    for _ in 0..volume_count {
        volume_map.push((read_string(&mut cur)?, read_string(&mut cur)?));
    }

    Ok(TopicsSnapshot { topics, aliases, volume_map })
}

// ============================================================================
// learning.bin
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct LearningWeights {
    pub vector: f32,
    pub recency: f32,
    pub frequency: f32,
    pub text: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryHistoryEntry {
    pub embedding: Vec<f32>,
    pub retrieved: Vec<VolumeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub id: VolumeId,
    pub total_retrievals: u64,
    pub query_count: u64,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningSnapshot {
    pub total_queries: u64,
    pub weights: Option<LearningWeights>,
    pub history: Vec<QueryHistoryEntry>,
    pub feedback: Vec<FeedbackEntry>,
}

pub fn encode_learning(snapshot: &LearningSnapshot) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
    buf.write_u64::<LittleEndian>(snapshot.total_queries).unwrap();
    let w = snapshot.weights.clone().unwrap_or(LearningWeights {
        vector: 0.6,
        recency: 0.2,
        frequency: 0.2,
        text: 0.0,
    });
    buf.write_f32::<LittleEndian>(w.vector).unwrap();
    buf.write_f32::<LittleEndian>(w.recency).unwrap();
    buf.write_f32::<LittleEndian>(w.frequency).unwrap();
    buf.write_f32::<LittleEndian>(w.text).unwrap();

    buf.write_u32::<LittleEndian>(snapshot.history.len() as u32).unwrap();
    for entry in &snapshot.history {
        buf.write_u32::<LittleEndian>(entry.embedding.len() as u32).unwrap();
        for x in &entry.embedding {
            buf.write_f32::<LittleEndian>(*x).unwrap();
        }
        buf.write_u32::<LittleEndian>(entry.retrieved.len() as u32).unwrap();
        for id in &entry.retrieved {
            write_string(&mut buf, id);
        }
    }

    buf.write_u32::<LittleEndian>(snapshot.feedback.len() as u32).unwrap();
    for f in &snapshot.feedback {
        write_string(&mut buf, &f.id);
        buf.write_u64::<LittleEndian>(f.total_retrievals).unwrap();
        buf.write_u64::<LittleEndian>(f.query_count).unwrap();
        buf.write_i64::<LittleEndian>(f.first_seen_ms).unwrap();
        buf.write_i64::<LittleEndian>(f.last_seen_ms).unwrap();
    }
    buf
}

pub fn decode_learning(bytes: &[u8]) -> Result<LearningSnapshot> {
    if bytes.is_empty() {
        return Ok(LearningSnapshot::default());
    }
    let mut cur = Cursor::new(bytes);
    let _version = check_version(&mut cur)?;
    let total_queries = cur.read_u64::<LittleEndian>().map_err(|_| corrupt("truncated total_queries"))?;
    let weights = LearningWeights {
        vector: cur.read_f32::<LittleEndian>().map_err(|_| corrupt("truncated weight"))?,
        recency: cur.read_f32::<LittleEndian>().map_err(|_| corrupt("truncated weight"))?,
        frequency: cur.read_f32::<LittleEndian>().map_err(|_| corrupt("truncated weight"))?,
        text: cur.read_f32::<LittleEndian>().map_err(|_| corrupt("truncated weight"))?,
    };

    let history_len = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated history len"))?;
    let mut history = Vec::with_capacity(history_len as usize);
    for _ in 0..history_len {
        let dim = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated embedding dim"))?;
        let mut embedding = Vec::with_capacity(dim as usize);
        for _ in 0..dim {
            embedding.push(cur.read_f32::<LittleEndian>().map_err(|_| corrupt("truncated embedding"))?);
        }
        let retrieved_count =
            cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated retrieved count"))?;
        let mut retrieved = Vec::with_capacity(retrieved_count as usize);
        for _ in 0..retrieved_count {
            retrieved.push(read_string(&mut cur)?);
        }
        history.push(QueryHistoryEntry { embedding, retrieved });
    }

    let feedback_len = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated feedback len"))?;
    let mut feedback = Vec::with_capacity(feedback_len as usize);
    for _ in 0..feedback_len {
        let id = read_string(&mut cur)?;
        let total_retrievals =
            cur.read_u64::<LittleEndian>().map_err(|_| corrupt("truncated total_retrievals"))?;
        let query_count = cur.read_u64::<LittleEndian>().map_err(|_| corrupt("truncated query_count"))?;
        let first_seen_ms = cur.read_i64::<LittleEndian>().map_err(|_| corrupt("truncated first_seen"))?;
        let last_seen_ms = cur.read_i64::<LittleEndian>().map_err(|_| corrupt("truncated last_seen"))?;
        feedback.push(FeedbackEntry { id, total_retrievals, query_count, first_seen_ms, last_seen_ms });
    }

    Ok(LearningSnapshot { total_queries, weights: Some(weights), history, feedback })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volumes_round_trip() {
        let mut metadata = BTreeMap::new();
        metadata.insert("topic".to_string(), "rust".to_string());
        let records = vec![VolumeRecord {
            id: "v1".into(),
            text: "hello world".into(),
            embedding: vec![1.0, 2.0, 3.0],
            timestamp_ms: 12345,
            metadata,
        }];
        let bytes = encode_volumes(&records);
        let decoded = decode_volumes(&bytes).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn access_round_trip() {
        let records = vec![AccessRecord { id: "v1".into(), hits: 3, last_hit_ms: 999 }];
        let bytes = encode_access(&records);
        assert_eq!(decode_access(&bytes).unwrap(), records);
    }

    #[test]
    fn topics_round_trip() {
        let snapshot = TopicsSnapshot {
            topics: vec![("programming/rust".into(), Some("programming".into()), vec![])],
            aliases: vec![("ml".into(), "machine-learning".into())],
            volume_map: vec![("v1".into(), "programming/rust".into())],
        };
        let bytes = encode_topics(&snapshot);
        assert_eq!(decode_topics(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn learning_round_trip() {
        let snapshot = LearningSnapshot {
            total_queries: 7,
            weights: Some(LearningWeights { vector: 0.6, recency: 0.2, frequency: 0.2, text: 0.0 }),
            history: vec![QueryHistoryEntry { embedding: vec![0.1, 0.2], retrieved: vec!["v1".into()] }],
            feedback: vec![FeedbackEntry {
                id: "v1".into(),
                total_retrievals: 2,
                query_count: 1,
                first_seen_ms: 10,
                last_seen_ms: 20,
            }],
        };
        let bytes = encode_learning(&snapshot);
        assert_eq!(decode_learning(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn decode_empty_bytes_is_empty_not_error() {
        assert!(decode_volumes(&[]).unwrap().is_empty());
        assert!(decode_access(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_bytes_are_corruption_not_panic() {
        let bytes = vec![1, 0, 0, 0]; // version ok, then a bogus length header
        assert!(decode_volumes(&bytes).is_err());
    }
}
