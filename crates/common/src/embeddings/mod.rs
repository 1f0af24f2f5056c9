//! Embedding records and the read-only embedding store contract
//!
//! Embeddings are produced elsewhere (an external model service writes them
//! to the store); the matcher only reads them, one corpus at a time.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type PaperId = i64;
pub type CorpusId = i64;
pub type SectionId = i64;

/// What part of a paper a vector represents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    Abstract,
    Section,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Abstract => "abstract",
            EmbeddingKind::Section => "section",
        }
    }
}

impl fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abstract" => Ok(EmbeddingKind::Abstract),
            "section" => Ok(EmbeddingKind::Section),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown embedding type '{}'", other),
            }),
        }
    }
}

/// One stored vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub paper_id: PaperId,
    /// Present iff `kind` is `Section`
    pub section_id: Option<SectionId>,
    pub vector: Vec<f32>,
    pub kind: EmbeddingKind,
    pub model_name: String,
}

impl Embedding {
    pub fn abstract_vector(paper_id: PaperId, model_name: &str, vector: Vec<f32>) -> Self {
        Self {
            paper_id,
            section_id: None,
            vector,
            kind: EmbeddingKind::Abstract,
            model_name: model_name.to_string(),
        }
    }

    pub fn section_vector(
        paper_id: PaperId,
        section_id: SectionId,
        model_name: &str,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            paper_id,
            section_id: Some(section_id),
            vector,
            kind: EmbeddingKind::Section,
            model_name: model_name.to_string(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Restricts which embeddings a fetch returns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddingFilter {
    /// `None` returns every kind
    pub kind: Option<EmbeddingKind>,
    /// `None` returns every model
    pub model_name: Option<String>,
}

impl EmbeddingFilter {
    /// Filter matching the vector scope of a run
    pub fn for_scope(use_sections: bool, model_name: Option<String>) -> Self {
        Self {
            kind: if use_sections { None } else { Some(EmbeddingKind::Abstract) },
            model_name,
        }
    }

    pub fn accepts(&self, embedding: &Embedding) -> bool {
        self.kind.map_or(true, |k| k == embedding.kind)
            && self
                .model_name
                .as_deref()
                .map_or(true, |m| m == embedding.model_name)
    }
}

/// Upstream source of embeddings, consumed read-only
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// All embeddings of a corpus that pass the filter
    async fn get_embeddings(
        &self,
        corpus_id: CorpusId,
        filter: &EmbeddingFilter,
    ) -> Result<Vec<Embedding>>;

    /// Ids of every paper in a corpus, ascending
    async fn list_papers(&self, corpus_id: CorpusId) -> Result<Vec<PaperId>>;

    /// Embeddings of the given papers only, so large corpora can be streamed
    async fn get_paper_embeddings(
        &self,
        corpus_id: CorpusId,
        paper_ids: &[PaperId],
        filter: &EmbeddingFilter,
    ) -> Result<Vec<Embedding>>;
}

/// Parse the pgvector text form `[1.0,2.0,...]`
pub fn parse_vector(text: &str) -> Result<Vec<f32>> {
    let inner = text.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|v| {
            v.trim().parse::<f32>().map_err(|e| AppError::InvalidFormat {
                message: format!("bad vector component '{}': {}", v.trim(), e),
            })
        })
        .collect()
}

/// Render a vector in pgvector text form
pub fn format_vector(vector: &[f32]) -> String {
    format!(
        "[{}]",
        vector
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}
