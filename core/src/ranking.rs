//! Query-time scoring over a [`FrozenIndex`]: cosine over TF-IDF vectors, BM25, and a
//! Dirichlet-smoothed query-likelihood model.
//!
//! Every scorer only sees documents that contain at least one query term. Results are
//! ordered by score descending, then by document id ascending.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::SearchError;
use crate::index::{DocId, FrozenIndex, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RankingModel {
    #[serde(rename = "vsm")]
    VectorSpace,
    #[serde(rename = "bm25")]
    Bm25,
    #[serde(rename = "lm_dirichlet")]
    LanguageModel,
}

impl RankingModel {
    pub const ALL: [RankingModel; 3] =
        [RankingModel::VectorSpace, RankingModel::Bm25, RankingModel::LanguageModel];

    pub fn name(self) -> &'static str {
        match self {
            RankingModel::VectorSpace => "vsm",
            RankingModel::Bm25 => "bm25",
            RankingModel::LanguageModel => "lm_dirichlet",
        }
    }
}

impl fmt::Display for RankingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RankingModel {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vsm" | "vector-space" | "vector_space" | "tfidf" | "tf-idf" => Ok(RankingModel::VectorSpace),
            "bm25" => Ok(RankingModel::Bm25),
            "lm_dirichlet" | "language-model" | "language_model" | "lm" => Ok(RankingModel::LanguageModel),
            _ => Err(SearchError::UnknownModel(s.to_string())),
        }
    }
}

/// BM25 constants.
///
/// - `k1`: term-frequency saturation. Larger values let repeated terms count for longer.
/// - `b`: length normalization. 0.0 ignores document length, 1.0 normalizes fully.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Dirichlet prior for the language model. Must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirichletParams {
    pub mu: f64,
}

impl Default for DirichletParams {
    fn default() -> Self {
        Self { mu: 2000.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub bm25: Bm25Params,
    pub dirichlet: DirichletParams,
}

impl RankingConfig {
    /// Reject constants that would make a scorer produce NaN or infinite scores:
    /// `k1 >= 0`, `0 <= b <= 1` and `mu > 0`, all finite.
    pub fn validate(&self) -> Result<(), SearchError> {
        let Bm25Params { k1, b } = self.bm25;
        let mu = self.dirichlet.mu;
        if !k1.is_finite() || k1 < 0.0 {
            return Err(SearchError::InvalidConfig(format!("bm25 k1 must be finite and >= 0, got {k1}")));
        }
        if !(0.0..=1.0).contains(&b) {
            return Err(SearchError::InvalidConfig(format!("bm25 b must lie in [0, 1], got {b}")));
        }
        if !mu.is_finite() || mu <= 0.0 {
            return Err(SearchError::InvalidConfig(format!("dirichlet mu must be finite and > 0, got {mu}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

/// Distinct query terms that occur in the index, with their count in the query.
pub type QueryTerms = BTreeMap<Term, u32>;

impl FrozenIndex {
    /// Tokenize `query` with the index's own tokenizer and keep the terms it knows.
    pub fn query_terms(&self, query: &str) -> QueryTerms {
        let mut terms = QueryTerms::new();
        for term in self.tokenizer().tokenize(query) {
            if self.postings.contains_key(&term) {
                *terms.entry(term).or_insert(0) += 1;
            }
        }
        terms
    }

    /// Score `query` under `model` and return at most `top_k` results.
    pub fn rank(&self, model: RankingModel, query: &str, top_k: i64, config: &RankingConfig) -> Vec<ScoredDoc> {
        if top_k <= 0 {
            return Vec::new();
        }
        let terms = self.query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let scores = match model {
            RankingModel::VectorSpace => self.score_vector_space(&terms),
            RankingModel::Bm25 => self.score_bm25(&terms, &config.bm25),
            RankingModel::LanguageModel => self.score_dirichlet(&terms, &config.dirichlet),
        };
        top_k_sorted(scores, top_k)
    }

    /// Cosine similarity between the query's TF-IDF vector and each candidate's
    /// precomputed vector. Candidates with a zero dot product are dropped.
    pub fn score_vector_space(&self, terms: &QueryTerms) -> HashMap<DocId, f64> {
        let weighting = self.config.weighting;
        let query_vec: Vec<(&str, f64)> = terms
            .iter()
            .map(|(term, &qtf)| (term.as_str(), weighting.weight(qtf, self.num_docs, self.doc_freq(term))))
            .collect();
        let query_norm = query_vec.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if query_norm == 0.0 {
            return HashMap::new();
        }

        let mut dots: HashMap<DocId, f64> = HashMap::new();
        for (term, q_w) in &query_vec {
            for p in self.postings(term).unwrap_or_default() {
                let d_w = self
                    .doc(p.doc_id)
                    .and_then(|d| d.vector.get(*term))
                    .copied()
                    .unwrap_or(0.0);
                *dots.entry(p.doc_id).or_insert(0.0) += q_w * d_w;
            }
        }

        dots.into_iter()
            .filter_map(|(doc_id, dot)| {
                let norm = self.doc(doc_id)?.norm;
                if dot == 0.0 || norm == 0.0 {
                    return None;
                }
                Some((doc_id, dot / (query_norm * norm)))
            })
            .collect()
    }

    pub fn score_bm25(&self, terms: &QueryTerms, params: &Bm25Params) -> HashMap<DocId, f64> {
        let n = self.num_docs as f64;
        let avg = self.avg_doc_length;
        let mut scores: HashMap<DocId, f64> = HashMap::new();
        for term in terms.keys() {
            let df = self.doc_freq(term) as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for p in self.postings(term).unwrap_or_default() {
                let len = self.doc(p.doc_id).map_or(0.0, |d| d.length as f64);
                let rel_len = if avg > 0.0 { len / avg } else { 0.0 };
                let tf = p.tf as f64;
                let denom = tf + params.k1 * (1.0 - params.b + params.b * rel_len);
                *scores.entry(p.doc_id).or_insert(0.0) += idf * (tf * (params.k1 + 1.0)) / denom;
            }
        }
        scores
    }

    /// Query log-likelihood under each candidate's Dirichlet-smoothed unigram model.
    /// Each matched term contributes once per occurrence in the query.
    pub fn score_dirichlet(&self, terms: &QueryTerms, params: &DirichletParams) -> HashMap<DocId, f64> {
        let mu = params.mu;
        let candidates: HashSet<DocId> = terms
            .keys()
            .flat_map(|term| self.postings(term).unwrap_or_default().iter().map(|p| p.doc_id))
            .collect();

        let mut scores = HashMap::with_capacity(candidates.len());
        for doc_id in candidates {
            let Some(doc) = self.doc(doc_id) else { continue };
            let len = doc.length as f64;
            let mut score = 0.0;
            for (term, &qtf) in terms {
                let tf = self.term_frequency(term, doc_id) as f64;
                let p_c = self.collection_probability(term);
                score += qtf as f64 * ((tf + mu * p_c) / (len + mu)).ln();
            }
            scores.insert(doc_id, score);
        }
        scores
    }

    /// tf of `term` in `doc_id`, 0 when absent.
    pub fn term_frequency(&self, term: &str, doc_id: DocId) -> u32 {
        self.postings(term)
            .and_then(|list| list.binary_search_by_key(&doc_id, |p| p.doc_id).ok().map(|i| list[i].tf))
            .unwrap_or(0)
    }

    /// P(term | collection), with a floor for terms the collection never saw.
    pub fn collection_probability(&self, term: &str) -> f64 {
        let cf = self.collection_freq(term);
        if cf == 0 || self.collection_length == 0 {
            return 0.5 / (self.collection_length as f64 + 1.0);
        }
        cf as f64 / self.collection_length as f64
    }
}

/// Score descending, document id ascending on exact ties.
pub fn compare_scored(a: &ScoredDoc, b: &ScoredDoc) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id))
}

pub fn top_k_sorted(scores: HashMap<DocId, f64>, top_k: i64) -> Vec<ScoredDoc> {
    if top_k <= 0 {
        return Vec::new();
    }
    let mut ranked: Vec<ScoredDoc> = scores
        .into_iter()
        .map(|(doc_id, score)| ScoredDoc { doc_id, score })
        .collect();
    ranked.sort_unstable_by(compare_scored);
    ranked.truncate(usize::try_from(top_k).unwrap_or(usize::MAX));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexBuilder, IndexConfig};

    fn build(docs: &[&str]) -> FrozenIndex {
        let mut b = IndexBuilder::new(IndexConfig::default());
        for (id, text) in docs.iter().enumerate() {
            b.add_document(id as DocId, text).unwrap();
        }
        b.finalize().unwrap()
    }

    fn ids(hits: &[ScoredDoc]) -> Vec<DocId> {
        hits.iter().map(|h| h.doc_id).collect()
    }

    #[test]
    fn parses_model_names() {
        assert_eq!("vsm".parse::<RankingModel>().unwrap(), RankingModel::VectorSpace);
        assert_eq!("BM25".parse::<RankingModel>().unwrap(), RankingModel::Bm25);
        assert_eq!("lm_dirichlet".parse::<RankingModel>().unwrap(), RankingModel::LanguageModel);
        assert_eq!("language-model".parse::<RankingModel>().unwrap(), RankingModel::LanguageModel);
        assert_eq!(
            "pagerank".parse::<RankingModel>().unwrap_err(),
            SearchError::UnknownModel("pagerank".into())
        );
        for m in RankingModel::ALL {
            assert_eq!(m.name().parse::<RankingModel>().unwrap(), m);
        }
    }

    #[test]
    fn rejects_out_of_range_constants() {
        assert_eq!(RankingConfig::default().validate(), Ok(()));
        let edge = RankingConfig { bm25: Bm25Params { k1: 0.0, b: 1.0 }, dirichlet: DirichletParams { mu: 0.5 } };
        assert_eq!(edge.validate(), Ok(()));

        let with = |k1: f64, b: f64, mu: f64| RankingConfig {
            bm25: Bm25Params { k1, b },
            dirichlet: DirichletParams { mu },
        };
        for bad in [
            with(1.2, 0.75, 0.0),
            with(1.2, 0.75, -5.0),
            with(1.2, 0.75, f64::INFINITY),
            with(-0.1, 0.75, 2000.0),
            with(f64::NAN, 0.75, 2000.0),
            with(1.2, -0.01, 2000.0),
            with(1.2, 1.5, 2000.0),
            with(1.2, f64::NAN, 2000.0),
        ] {
            assert!(matches!(bad.validate(), Err(SearchError::InvalidConfig(_))), "{bad:?} accepted");
        }
    }

    #[test]
    fn bm25_matches_formula() {
        let idx = build(&["portal portal gun", "portal fluid", "garage"]);
        let params = Bm25Params::default();
        let hits = idx.rank(RankingModel::Bm25, "portal", 10, &RankingConfig::default());
        assert_eq!(ids(&hits), vec![0, 1]);

        let n = 3.0;
        let df = 2.0;
        let avg = 6.0 / 3.0;
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0f64).ln();
        let tf = 2.0;
        let expected = idf * (tf * (params.k1 + 1.0)) / (tf + params.k1 * (1.0 - params.b + params.b * 3.0 / avg));
        assert!((hits[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn dirichlet_matches_formula() {
        let idx = build(&["portal gun", "gun fluid fluid"]);
        let mu = 10.0;
        let config = RankingConfig { dirichlet: DirichletParams { mu }, ..Default::default() };
        let hits = idx.rank(RankingModel::LanguageModel, "portal gun", 10, &config);
        assert_eq!(hits.len(), 2);

        let len = 5.0;
        let p_portal = 1.0 / len;
        let p_gun = 2.0 / len;
        let doc1 = ((0.0 + mu * p_portal) / (3.0 + mu)).ln() + ((1.0 + mu * p_gun) / (3.0 + mu)).ln();
        let doc1_hit = hits.iter().find(|h| h.doc_id == 1).unwrap();
        assert!((doc1_hit.score - doc1).abs() < 1e-12);
        assert_eq!(hits[0].doc_id, 0);
    }

    #[test]
    fn dirichlet_counts_repeated_query_terms() {
        let idx = build(&["portal gun", "gun fluid"]);
        let config = RankingConfig::default();
        let once = idx.rank(RankingModel::LanguageModel, "portal", 10, &config);
        let twice = idx.rank(RankingModel::LanguageModel, "portal portal", 10, &config);
        assert!((twice[0].score - 2.0 * once[0].score).abs() < 1e-12);
    }

    #[test]
    fn cosine_of_identical_text_is_one() {
        let idx = build(&["squanch planet", "citadel ricks", "squanch"]);
        let hits = idx.rank(RankingModel::VectorSpace, "squanch planet", 10, &RankingConfig::default());
        assert_eq!(hits[0].doc_id, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-12);
        assert!(hits.iter().all(|h| h.doc_id != 1));
    }

    #[test]
    fn cosine_drops_zero_dot_products() {
        let mut b = IndexBuilder::new(IndexConfig {
            weighting: crate::index::VectorWeighting { idf: crate::index::IdfScheme::Plain, ..Default::default() },
            ..Default::default()
        });
        b.add_document(0, "rick portal").unwrap();
        b.add_document(1, "rick").unwrap();
        let idx = b.finalize().unwrap();
        // "rick" occurs everywhere, so its plain idf and every dot product are zero.
        assert!(idx.rank(RankingModel::VectorSpace, "rick", 10, &RankingConfig::default()).is_empty());
        assert_eq!(idx.rank(RankingModel::Bm25, "rick", 10, &RankingConfig::default()).len(), 2);
    }

    #[test]
    fn empty_and_unknown_queries_match_nothing() {
        let idx = build(&["rick morty"]);
        for m in RankingModel::ALL {
            assert!(idx.rank(m, "", 10, &RankingConfig::default()).is_empty());
            assert!(idx.rank(m, "the of and", 10, &RankingConfig::default()).is_empty());
            assert!(idx.rank(m, "unity", 10, &RankingConfig::default()).is_empty());
        }
    }

    #[test]
    fn top_k_bounds() {
        let idx = build(&["mr meeseeks", "meeseeks box", "meeseeks meeseeks"]);
        let cfg = RankingConfig::default();
        for m in RankingModel::ALL {
            assert!(idx.rank(m, "meeseeks", 0, &cfg).is_empty());
            assert!(idx.rank(m, "meeseeks", -3, &cfg).is_empty());
            assert_eq!(idx.rank(m, "meeseeks", 2, &cfg).len(), 2);
            assert_eq!(idx.rank(m, "meeseeks", 50, &cfg).len(), 3);
        }
    }

    #[test]
    fn ties_break_by_doc_id() {
        let mut scores = HashMap::new();
        scores.insert(9, 1.5);
        scores.insert(2, 1.5);
        scores.insert(5, 3.0);
        scores.insert(4, 1.5);
        let ranked = top_k_sorted(scores, 10);
        assert_eq!(ids(&ranked), vec![5, 2, 4, 9]);
    }

    #[test]
    fn collection_probability_has_floor() {
        let idx = build(&["rick", "morty"]);
        assert!((idx.collection_probability("rick") - 0.5).abs() < 1e-12);
        let floor = idx.collection_probability("unity");
        assert!(floor > 0.0 && floor < 0.5);
    }
}
