use crate::corpus::DocIdMap;
use crate::error::SearchError;
use crate::index::{average_length, collection_stats, DocStats, FrozenIndex, IndexConfig, Posting};
use crate::{DocId, Term};
use anyhow::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Leading bytes of every index blob; the last byte is the format version.
const MAGIC: &[u8; 8] = b"IMGCTX\0\x01";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub vocabulary: usize,
    pub created_at: String,
    pub version: u32,
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index(&self) -> PathBuf { self.root.join("index.bin") }
    pub fn doc_id_map(&self) -> PathBuf { self.root.join("doc_id_map.json") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

#[derive(Serialize)]
struct StoredIndexRef<'a> {
    config: &'a IndexConfig,
    inverted_index: &'a HashMap<Term, Vec<Posting>>,
    docs: &'a HashMap<DocId, DocStats>,
    doc_count: u32,
    avg_doc_length: f64,
}

#[derive(Deserialize)]
#[cfg_attr(test, derive(Serialize))]
struct StoredIndex {
    config: IndexConfig,
    inverted_index: HashMap<Term, Vec<Posting>>,
    docs: HashMap<DocId, DocStats>,
    doc_count: u32,
    avg_doc_length: f64,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

fn corrupt(reason: impl Into<String>) -> SearchError {
    SearchError::CorruptIndex(reason.into())
}

/// Serialize a frozen index into a self-describing blob.
pub fn encode(index: &FrozenIndex) -> std::result::Result<Vec<u8>, SearchError> {
    let stored = StoredIndexRef {
        config: &index.config,
        inverted_index: &index.postings,
        docs: &index.docs,
        doc_count: index.num_docs,
        avg_doc_length: index.avg_doc_length,
    };
    let body = codec()
        .serialize(&stored)
        .map_err(|err| corrupt(format!("encode failed: {err}")))?;
    let mut blob = Vec::with_capacity(MAGIC.len() + body.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&body);
    Ok(blob)
}

/// Rebuild a frozen index from [`encode`] output. Stored weights, norms and the average
/// length must match what the postings recompute to, bit for bit; collection statistics
/// are recounted.
pub fn decode(blob: &[u8]) -> std::result::Result<FrozenIndex, SearchError> {
    let body = blob
        .strip_prefix(&MAGIC[..])
        .ok_or_else(|| corrupt("missing or unsupported header"))?;
    let stored: StoredIndex = codec()
        .deserialize(body)
        .map_err(|err| corrupt(format!("decode failed: {err}")))?;
    stored.validate()?;

    let (collection_freq, collection_length) = collection_stats(&stored.inverted_index, &stored.docs);
    Ok(FrozenIndex {
        config: stored.config,
        postings: stored.inverted_index,
        docs: stored.docs,
        num_docs: stored.doc_count,
        avg_doc_length: stored.avg_doc_length,
        collection_freq,
        collection_length,
    })
}

impl StoredIndex {
    fn validate(&self) -> std::result::Result<(), SearchError> {
        if self.doc_count as usize != self.docs.len() {
            return Err(corrupt(format!(
                "doc_count {} but {} documents stored",
                self.doc_count,
                self.docs.len()
            )));
        }

        let mut tf_sums: HashMap<DocId, u64> = HashMap::new();
        let mut term_counts: HashMap<DocId, usize> = HashMap::new();
        for (term, list) in &self.inverted_index {
            if list.is_empty() {
                return Err(corrupt(format!("empty posting list for {term:?}")));
            }
            let df = list.len() as u32;
            let mut prev: Option<DocId> = None;
            for p in list {
                if prev.is_some_and(|prev| prev >= p.doc_id) {
                    return Err(corrupt(format!("postings for {term:?} not strictly ordered by doc id")));
                }
                prev = Some(p.doc_id);
                if p.tf == 0 {
                    return Err(corrupt(format!("zero tf for {term:?} in doc {}", p.doc_id)));
                }
                let doc = self
                    .docs
                    .get(&p.doc_id)
                    .ok_or_else(|| corrupt(format!("posting for {term:?} references unknown doc {}", p.doc_id)))?;
                let stored = doc
                    .vector
                    .get(term)
                    .ok_or_else(|| corrupt(format!("doc {} has no weight for {term:?}", p.doc_id)))?;
                let expected = self.config.weighting.weight(p.tf, self.doc_count, df);
                if stored.to_bits() != expected.to_bits() {
                    return Err(corrupt(format!("doc {} weight for {term:?} disagrees with its postings", p.doc_id)));
                }
                *tf_sums.entry(p.doc_id).or_insert(0) += p.tf as u64;
                *term_counts.entry(p.doc_id).or_insert(0) += 1;
            }
        }

        let mut total: u64 = 0;
        for (id, doc) in &self.docs {
            total += doc.length as u64;
            if tf_sums.get(id).copied().unwrap_or(0) != doc.length as u64 {
                return Err(corrupt(format!("doc {id} length disagrees with its postings")));
            }
            if term_counts.get(id).copied().unwrap_or(0) != doc.vector.len() {
                return Err(corrupt(format!("doc {id} vector disagrees with its postings")));
            }
            if !doc.norm.is_finite() || doc.norm < 0.0 || doc.vector.values().any(|w| !w.is_finite()) {
                return Err(corrupt(format!("doc {id} has a non-finite weight or norm")));
            }
            // Same summation order as the builder, so a faithful blob matches exactly.
            let norm = doc.vector.values().map(|w| w * w).sum::<f64>().sqrt();
            if norm.to_bits() != doc.norm.to_bits() {
                return Err(corrupt(format!("doc {id} norm disagrees with its weights")));
            }
        }
        if average_length(total, self.doc_count) != self.avg_doc_length {
            return Err(corrupt("average document length disagrees with document lengths"));
        }
        Ok(())
    }
}

pub fn save_index(paths: &IndexPaths, index: &FrozenIndex) -> Result<()> {
    create_dir_all(&paths.root)?;
    let bytes = encode(index)?;
    let mut f = File::create(paths.index())?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_index(paths: &IndexPaths) -> Result<FrozenIndex> {
    let mut f = File::open(paths.index())?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let index = decode(&buf)?;
    Ok(index)
}

pub fn save_doc_id_map(paths: &IndexPaths, map: &DocIdMap) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.doc_id_map())?;
    let json = serde_json::to_string_pretty(map)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_doc_id_map(paths: &IndexPaths) -> Result<DocIdMap> {
    let mut f = File::open(paths.doc_id_map())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let map: DocIdMap = serde_json::from_str(&buf)?;
    Ok(map)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Load everything a serving process needs: the index and its id→metadata table.
/// Metadata coverage problems are logged, not fatal.
pub fn load_all(paths: &IndexPaths) -> Result<(FrozenIndex, DocIdMap)> {
    let index = load_index(paths)?;
    let doc_map = load_doc_id_map(paths)?;
    match load_meta(paths) {
        Ok(meta) if meta.version != FORMAT_VERSION => {
            tracing::warn!(version = meta.version, expected = FORMAT_VERSION, "index meta version mismatch");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(%err, "index meta unreadable"),
    }
    doc_map.check_coverage(&index);
    tracing::info!(
        root = %paths.root.display(),
        num_docs = index.num_docs(),
        num_terms = index.vocabulary_len(),
        "index loaded"
    );
    Ok((index, doc_map))
}
