use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::mem;

use crate::error::{Result, SearchError};
use crate::tokenizer::{Tokenizer, TokenizerConfig};

pub type DocId = u32;
pub type Term = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub tf: u32, // raw occurrence count, always >= 1
}

/// Term-frequency component of a vector-space weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TfScheme {
    /// tf
    Raw,
    /// 1 + ln(tf)
    #[default]
    Log,
}

impl TfScheme {
    pub fn weight(self, tf: u32) -> f64 {
        if tf == 0 { return 0.0; }
        match self {
            TfScheme::Raw => tf as f64,
            TfScheme::Log => 1.0 + (tf as f64).ln(),
        }
    }
}

/// Inverse-document-frequency component of a vector-space weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdfScheme {
    /// ln(N/df); zero for a term present in every document
    Plain,
    /// ln(1 + N/df)
    #[default]
    Smoothed,
}

impl IdfScheme {
    pub fn weight(self, num_docs: u32, df: u32) -> f64 {
        if df == 0 { return 0.0; }
        let ratio = num_docs as f64 / df as f64;
        match self {
            IdfScheme::Plain => ratio.ln(),
            IdfScheme::Smoothed => (1.0 + ratio).ln(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VectorWeighting {
    pub tf: TfScheme,
    pub idf: IdfScheme,
}

impl VectorWeighting {
    pub fn weight(&self, tf: u32, num_docs: u32, df: u32) -> f64 {
        self.tf.weight(tf) * self.idf.weight(num_docs, df)
    }
}

/// Build-time choices that must also hold at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    pub tokenizer: TokenizerConfig,
    pub weighting: VectorWeighting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocStats {
    /// Token count after tokenization, repeats included.
    pub length: u32,
    pub vector: BTreeMap<Term, f64>,
    pub norm: f64,
}

/// Accumulates postings for a single build. Consumed by [`IndexBuilder::finalize`].
pub struct IndexBuilder {
    config: IndexConfig,
    tokenizer: Tokenizer,
    postings: HashMap<Term, Vec<Posting>>,
    lengths: HashMap<DocId, u32>,
    finalized: bool,
}

impl IndexBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            tokenizer: Tokenizer::new(config.tokenizer),
            postings: HashMap::new(),
            lengths: HashMap::new(),
            finalized: false,
        }
    }

    /// Number of documents added so far.
    pub fn len(&self) -> usize { self.lengths.len() }

    pub fn is_empty(&self) -> bool { self.lengths.is_empty() }

    /// Tokenize `text` and record its term counts against `id`.
    ///
    /// A document that tokenizes to nothing is still recorded with length 0.
    pub fn add_document(&mut self, id: DocId, text: &str) -> Result<()> {
        if self.finalized {
            return Err(SearchError::AlreadyFinalized);
        }
        if self.lengths.contains_key(&id) {
            return Err(SearchError::DuplicateDocument { id });
        }

        let terms = self.tokenizer.tokenize(text);
        let length = u32::try_from(terms.len()).unwrap_or(u32::MAX);
        let mut tf_counts: HashMap<Term, u32> = HashMap::new();
        for term in terms {
            *tf_counts.entry(term).or_insert(0) += 1;
        }
        for (term, tf) in tf_counts {
            self.postings.entry(term).or_default().push(Posting { doc_id: id, tf });
        }
        self.lengths.insert(id, length);
        Ok(())
    }

    /// Freeze the accumulated postings and compute every derived statistic.
    pub fn finalize(&mut self) -> Result<FrozenIndex> {
        if self.finalized {
            return Err(SearchError::AlreadyFinalized);
        }
        self.finalized = true;
        let postings = mem::take(&mut self.postings);
        let lengths = mem::take(&mut self.lengths);
        let index = FrozenIndex::from_accumulator(self.config, postings, lengths);
        tracing::info!(
            num_docs = index.num_docs,
            num_terms = index.postings.len(),
            avg_doc_length = index.avg_doc_length,
            "index finalized"
        );
        Ok(index)
    }
}

/// Immutable inverted index plus per-document and collection statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenIndex {
    pub(crate) config: IndexConfig,
    pub(crate) postings: HashMap<Term, Vec<Posting>>, // sorted by doc_id
    pub(crate) docs: HashMap<DocId, DocStats>,
    pub(crate) num_docs: u32,
    pub(crate) avg_doc_length: f64,
    pub(crate) collection_freq: HashMap<Term, u64>,
    pub(crate) collection_length: u64,
}

impl FrozenIndex {
    fn from_accumulator(
        config: IndexConfig,
        mut postings: HashMap<Term, Vec<Posting>>,
        lengths: HashMap<DocId, u32>,
    ) -> Self {
        for list in postings.values_mut() {
            list.sort_unstable_by_key(|p| p.doc_id);
        }
        let num_docs = lengths.len() as u32;
        let total: u64 = lengths.values().map(|&l| l as u64).sum();
        let avg_doc_length = average_length(total, num_docs);

        let mut docs: HashMap<DocId, DocStats> = lengths
            .into_iter()
            .map(|(id, length)| (id, DocStats { length, vector: BTreeMap::new(), norm: 0.0 }))
            .collect();
        for (term, list) in &postings {
            let df = list.len() as u32;
            for p in list {
                if let Some(doc) = docs.get_mut(&p.doc_id) {
                    doc.vector.insert(term.clone(), config.weighting.weight(p.tf, num_docs, df));
                }
            }
        }
        for doc in docs.values_mut() {
            doc.norm = doc.vector.values().map(|w| w * w).sum::<f64>().sqrt();
        }

        let (collection_freq, collection_length) = collection_stats(&postings, &docs);
        Self { config, postings, docs, num_docs, avg_doc_length, collection_freq, collection_length }
    }

    pub fn config(&self) -> IndexConfig { self.config }

    /// Tokenizer matching the one the index was built with.
    pub fn tokenizer(&self) -> Tokenizer { Tokenizer::new(self.config.tokenizer) }

    pub fn num_docs(&self) -> u32 { self.num_docs }

    pub fn avg_doc_length(&self) -> f64 { self.avg_doc_length }

    /// Sum of all document lengths.
    pub fn collection_length(&self) -> u64 { self.collection_length }

    pub fn vocabulary_len(&self) -> usize { self.postings.len() }

    pub fn postings(&self, term: &str) -> Option<&[Posting]> {
        self.postings.get(term).map(|v| v.as_slice())
    }

    pub fn doc_freq(&self, term: &str) -> u32 {
        self.postings.get(term).map_or(0, |v| v.len() as u32)
    }

    pub fn collection_freq(&self, term: &str) -> u64 {
        self.collection_freq.get(term).copied().unwrap_or(0)
    }

    pub fn doc_length(&self, doc_id: DocId) -> Option<u32> {
        self.docs.get(&doc_id).map(|d| d.length)
    }

    pub fn doc_vector(&self, doc_id: DocId) -> Option<&BTreeMap<Term, f64>> {
        self.docs.get(&doc_id).map(|d| &d.vector)
    }

    pub fn doc_norm(&self, doc_id: DocId) -> Option<f64> {
        self.docs.get(&doc_id).map(|d| d.norm)
    }

    pub fn contains_doc(&self, doc_id: DocId) -> bool { self.docs.contains_key(&doc_id) }

    /// All document ids, ascending.
    pub fn doc_ids(&self) -> Vec<DocId> {
        let mut ids: Vec<DocId> = self.docs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn doc(&self, doc_id: DocId) -> Option<&DocStats> { self.docs.get(&doc_id) }
}

pub(crate) fn average_length(total: u64, num_docs: u32) -> f64 {
    if num_docs == 0 { 0.0 } else { total as f64 / num_docs as f64 }
}

pub(crate) fn collection_stats(
    postings: &HashMap<Term, Vec<Posting>>,
    docs: &HashMap<DocId, DocStats>,
) -> (HashMap<Term, u64>, u64) {
    let freq = postings
        .iter()
        .map(|(term, list)| (term.clone(), list.iter().map(|p| p.tf as u64).sum()))
        .collect();
    let length = docs.values().map(|d| d.length as u64).sum();
    (freq, length)
}
