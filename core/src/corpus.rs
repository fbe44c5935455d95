use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::index::{FrozenIndex, IndexBuilder, IndexConfig};
use crate::ranking::ScoredDoc;
use crate::DocId;

/// One crawled image: where it lives, the page it came from, and the text around it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub source_page: Option<String>,
    #[serde(default)]
    pub alt_text: Option<String>,
    /// Text surrogate indexed for the image.
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMetadata {
    pub image_url: String,
    pub source_page: String,
    #[serde(default)]
    pub alt_text: String,
}

/// Display metadata keyed by document id. Serialized as a JSON object whose keys are
/// the decimal ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocIdMap(BTreeMap<DocId, DocMetadata>);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedHit {
    pub rank: usize,
    pub doc_id: DocId,
    pub score: f64,
    pub image_url: String,
    pub source_page: String,
    pub alt_text: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CoverageReport {
    /// Indexed documents with no metadata entry.
    pub missing_metadata: Vec<DocId>,
    /// Metadata entries for ids the index does not know.
    pub unknown_ids: Vec<DocId>,
}

impl CoverageReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_metadata.is_empty() && self.unknown_ids.is_empty()
    }
}

impl DocIdMap {
    pub fn insert(&mut self, id: DocId, meta: DocMetadata) -> Option<DocMetadata> {
        self.0.insert(id, meta)
    }

    pub fn get(&self, id: DocId) -> Option<&DocMetadata> { self.0.get(&id) }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn ids(&self) -> impl Iterator<Item = DocId> + '_ { self.0.keys().copied() }

    /// Join ranked hits with their metadata. Ranks count from 1 over the input order;
    /// hits without metadata are dropped with a warning.
    pub fn resolve(&self, hits: &[ScoredDoc]) -> Vec<ResolvedHit> {
        let mut out = Vec::with_capacity(hits.len());
        for (i, hit) in hits.iter().enumerate() {
            let Some(meta) = self.get(hit.doc_id) else {
                tracing::warn!(doc_id = hit.doc_id, "no metadata for scored document");
                continue;
            };
            out.push(ResolvedHit {
                rank: i + 1,
                doc_id: hit.doc_id,
                score: hit.score,
                image_url: meta.image_url.clone(),
                source_page: meta.source_page.clone(),
                alt_text: meta.alt_text.clone(),
            });
        }
        out
    }

    /// Compare the map's keys against the index's documents and warn on any mismatch.
    pub fn check_coverage(&self, index: &FrozenIndex) -> CoverageReport {
        let report = CoverageReport {
            missing_metadata: index.doc_ids().into_iter().filter(|id| !self.0.contains_key(id)).collect(),
            unknown_ids: self.ids().filter(|id| !index.contains_doc(*id)).collect(),
        };
        if !report.is_consistent() {
            tracing::warn!(
                missing_metadata = report.missing_metadata.len(),
                unknown_ids = report.unknown_ids.len(),
                "doc id map does not match the index"
            );
        }
        report
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Index crawled records in order. Usable records get dense ids starting at 0; records
/// without context or image URL are skipped.
pub fn build_from_records<I>(records: I, config: IndexConfig) -> Result<(FrozenIndex, DocIdMap)>
where
    I: IntoIterator<Item = CorpusRecord>,
{
    let mut builder = IndexBuilder::new(config);
    let mut doc_map = DocIdMap::default();
    let mut next_doc_id: DocId = 0;
    let mut skipped = 0usize;

    for (position, record) in records.into_iter().enumerate() {
        let (Some(context), Some(image_url)) = (non_empty(&record.context), non_empty(&record.image_url)) else {
            tracing::warn!(position, "skipping record without context or image_url");
            skipped += 1;
            continue;
        };
        let doc_id = next_doc_id;
        builder.add_document(doc_id, context)?;
        doc_map.insert(doc_id, DocMetadata {
            image_url: image_url.to_string(),
            source_page: record.source_page.clone().unwrap_or_default(),
            alt_text: record.alt_text.clone().unwrap_or_default(),
        });
        next_doc_id += 1;

        if (position + 1) % 100 == 0 {
            tracing::info!(processed = position + 1, indexed = builder.len(), "indexing progress");
        }
    }

    tracing::info!(indexed = builder.len(), skipped, "ingested records");
    let index = builder.finalize()?;
    Ok((index, doc_map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(image: &str, context: &str) -> CorpusRecord {
        CorpusRecord {
            image_url: Some(image.into()),
            source_page: Some(format!("https://wiki.example/{image}")),
            alt_text: None,
            context: Some(context.into()),
        }
    }

    #[test]
    fn skips_incomplete_records_with_dense_ids() {
        let records = vec![
            record("a.png", "Rick Sanchez"),
            record("", "no image"),
            record("c.png", "   "),
            CorpusRecord { context: Some("missing url".into()), ..Default::default() },
            record("e.png", "Morty Smith"),
        ];
        let (index, map) = build_from_records(records, IndexConfig::default()).unwrap();
        assert_eq!(index.num_docs(), 2);
        assert_eq!(index.doc_ids(), vec![0, 1]);
        assert_eq!(map.get(1).unwrap().image_url, "e.png");
        assert!(map.check_coverage(&index).is_consistent());
    }

    #[test]
    fn resolve_drops_missing_metadata() {
        let (_, map) = build_from_records(vec![record("a.png", "rick")], IndexConfig::default()).unwrap();
        let hits = [ScoredDoc { doc_id: 4, score: 2.0 }, ScoredDoc { doc_id: 0, score: 1.0 }];
        let resolved = map.resolve(&hits);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].rank, 2);
        assert_eq!(resolved[0].image_url, "a.png");
    }

    #[test]
    fn coverage_reports_both_directions() {
        let (index, mut map) = build_from_records(
            vec![record("a.png", "rick"), record("b.png", "morty")],
            IndexConfig::default(),
        )
        .unwrap();
        map.0.remove(&1);
        map.insert(9, DocMetadata { image_url: "z.png".into(), source_page: String::new(), alt_text: String::new() });
        let report = map.check_coverage(&index);
        assert_eq!(report.missing_metadata, vec![1]);
        assert_eq!(report.unknown_ids, vec![9]);
    }

    #[test]
    fn map_keys_serialize_as_decimal_strings() {
        let mut map = DocIdMap::default();
        map.insert(12, DocMetadata { image_url: "x.png".into(), source_page: "p".into(), alt_text: "alt".into() });
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["12"]["image_url"], "x.png");
        let back: DocIdMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn reads_crawler_output() {
        let raw = r#"[{"image_url": "https://static.example/rick.png", "source_page": "https://wiki.example/Rick",
                       "alt_text": "Rick", "context": "Rick Sanchez Rick"}]"#;
        let records: Vec<CorpusRecord> = serde_json::from_str(raw).unwrap();
        let (index, map) = build_from_records(records, IndexConfig::default()).unwrap();
        assert_eq!(index.doc_length(0), Some(3));
        assert_eq!(map.get(0).unwrap().alt_text, "Rick");
    }
}
