//! Text retrieval over image context: tokenizer, inverted index with precomputed
//! statistics, three ranking models, and the on-disk index format.

pub mod corpus;
pub mod engine;
pub mod error;
pub mod index;
pub mod persist;
pub mod ranking;
pub mod tokenizer;

pub use corpus::{build_from_records, CorpusRecord, DocIdMap, DocMetadata, ResolvedHit};
pub use engine::{SearchEngine, SearchOutcome, SearchStatus};
pub use error::{Result, SearchError};
pub use index::{
    DocId, DocStats, FrozenIndex, IdfScheme, IndexBuilder, IndexConfig, Posting, Term, TfScheme, VectorWeighting,
};
pub use ranking::{Bm25Params, DirichletParams, RankingConfig, RankingModel, ScoredDoc};
pub use tokenizer::{tokenize, Tokenizer, TokenizerConfig};
