//! Per-paper grouping of flat embedding records

use preprintbot_common::embeddings::{Embedding, EmbeddingKind, PaperId, SectionId};
use preprintbot_common::errors::{AppError, Result};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Identifies the vector a score came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct VectorRef {
    pub paper_id: PaperId,
    pub kind: EmbeddingKind,
    pub section_id: Option<SectionId>,
}

impl VectorRef {
    pub fn abstract_of(paper_id: PaperId) -> Self {
        Self {
            paper_id,
            kind: EmbeddingKind::Abstract,
            section_id: None,
        }
    }

    pub fn section_of(paper_id: PaperId, section_id: SectionId) -> Self {
        Self {
            paper_id,
            kind: EmbeddingKind::Section,
            section_id: Some(section_id),
        }
    }
}

/// All vectors of one paper, partitioned by kind and keyed by model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperVectorSet {
    pub paper_id: PaperId,
    /// At most one abstract vector per model
    pub abstracts: BTreeMap<String, Vec<f32>>,
    /// Section vectors per model, one per distinct section id
    pub sections: BTreeMap<String, BTreeMap<SectionId, Vec<f32>>>,
}

impl PaperVectorSet {
    fn new(paper_id: PaperId) -> Self {
        Self {
            paper_id,
            ..Default::default()
        }
    }

    /// Vectors taking part in matching, in a fixed order.
    ///
    /// Abstracts always participate; sections only when `use_sections`.
    pub fn vectors(&self, use_sections: bool) -> Vec<(&str, VectorRef, &[f32])> {
        let mut out: Vec<(&str, VectorRef, &[f32])> = self
            .abstracts
            .iter()
            .map(|(model, v)| (model.as_str(), VectorRef::abstract_of(self.paper_id), v.as_slice()))
            .collect();

        if use_sections {
            for (model, sections) in &self.sections {
                for (&section_id, v) in sections {
                    out.push((
                        model.as_str(),
                        VectorRef::section_of(self.paper_id, section_id),
                        v.as_slice(),
                    ));
                }
            }
        }
        out
    }

    pub fn vector_count(&self) -> usize {
        self.abstracts.len() + self.sections.values().map(BTreeMap::len).sum::<usize>()
    }
}

/// One corpus grouped by paper
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedCorpus {
    pub papers: BTreeMap<PaperId, PaperVectorSet>,
    /// Vector length per model
    pub dimensions: BTreeMap<String, usize>,
}

impl GroupedCorpus {
    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    pub fn vector_count(&self) -> usize {
        self.papers.values().map(PaperVectorSet::vector_count).sum()
    }
}

/// Group a flat list of embeddings by paper.
///
/// Fails on differing lengths within one model and on records that break
/// the per-paper invariants: a section id present iff the kind is section,
/// one abstract per model, distinct section ids per model.
pub fn group_embeddings(embeddings: Vec<Embedding>) -> Result<GroupedCorpus> {
    let mut corpus = GroupedCorpus::default();

    for embedding in embeddings {
        record_dimension(&mut corpus.dimensions, &embedding.model_name, embedding.dimension())?;

        let paper_id = embedding.paper_id;
        let set = corpus
            .papers
            .entry(paper_id)
            .or_insert_with(|| PaperVectorSet::new(paper_id));

        match (embedding.kind, embedding.section_id) {
            (EmbeddingKind::Abstract, None) => match set.abstracts.entry(embedding.model_name) {
                Entry::Vacant(slot) => {
                    slot.insert(embedding.vector);
                }
                Entry::Occupied(slot) => {
                    return Err(AppError::MalformedEmbedding {
                        paper_id,
                        message: format!("duplicate abstract vector for model '{}'", slot.key()),
                    });
                }
            },
            (EmbeddingKind::Section, Some(section_id)) => {
                let sections = set.sections.entry(embedding.model_name).or_default();
                if sections.insert(section_id, embedding.vector).is_some() {
                    return Err(AppError::MalformedEmbedding {
                        paper_id,
                        message: format!("duplicate vector for section {}", section_id),
                    });
                }
            }
            (kind, section_id) => {
                return Err(AppError::MalformedEmbedding {
                    paper_id,
                    message: format!("{} vector with section id {:?}", kind, section_id),
                });
            }
        }
    }

    Ok(corpus)
}

/// Record a model's vector length, failing if it differs from one seen before
pub fn record_dimension(
    dimensions: &mut BTreeMap<String, usize>,
    model: &str,
    dimension: usize,
) -> Result<()> {
    match dimensions.get(model) {
        Some(&expected) if expected != dimension => Err(AppError::InconsistentDimension {
            model: model.to_string(),
            expected,
            got: dimension,
        }),
        Some(_) => Ok(()),
        None => {
            dimensions.insert(model.to_string(), dimension);
            Ok(())
        }
    }
}
