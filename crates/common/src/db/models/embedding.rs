//! Embedding entity (one vector per abstract or section)

use crate::embeddings::{parse_vector, Embedding, EmbeddingKind};
use crate::errors::{AppError, Result as AppResult};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "embeddings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub paper_id: i64,

    /// Set for section vectors only
    pub section_id: Option<i64>,

    /// `abstract` or `section`
    #[sea_orm(column_name = "type", column_type = "Text")]
    pub kind: String,

    #[sea_orm(column_type = "Text")]
    pub model_name: String,

    /// pgvector embedding stored as text for SeaORM compatibility
    /// Actual vector operations done via raw SQL
    #[sea_orm(column_type = "Text")]
    pub embedding: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::paper::Entity",
        from = "Column::PaperId",
        to = "super::paper::Column::Id",
        on_delete = "Cascade"
    )]
    Paper,
}

impl Related<super::paper::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Paper.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Convert the stored row into the engine's record
    pub fn into_embedding(self) -> AppResult<Embedding> {
        let kind: EmbeddingKind = self.kind.parse()?;
        let vector = parse_vector(&self.embedding).map_err(|e| AppError::MalformedEmbedding {
            paper_id: self.paper_id,
            message: e.to_string(),
        })?;
        Ok(Embedding {
            paper_id: self.paper_id,
            section_id: self.section_id,
            vector,
            kind,
            model_name: self.model_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::EntityName;

    fn row(kind: &str, section_id: Option<i64>, embedding: &str) -> Model {
        Model {
            id: 1,
            paper_id: 42,
            section_id,
            kind: kind.to_string(),
            model_name: "all-MiniLM-L6-v2".to_string(),
            embedding: embedding.to_string(),
            created_at: chrono::Utc::now().into(),
        }
    }

    #[test]
    fn test_row_converts_to_embedding() {
        let embedding = row("section", Some(3), "[0.5,-1,2]").into_embedding().unwrap();

        assert_eq!(embedding.paper_id, 42);
        assert_eq!(embedding.section_id, Some(3));
        assert_eq!(embedding.kind, EmbeddingKind::Section);
        assert_eq!(embedding.vector, vec![0.5, -1.0, 2.0]);
        assert_eq!(Entity.table_name(), "embeddings");
    }

    #[test]
    fn test_bad_vector_text_is_malformed() {
        let err = row("abstract", None, "[1.0,nope]").into_embedding().unwrap_err();
        assert!(matches!(err, AppError::MalformedEmbedding { paper_id: 42, .. }));

        assert!(row("chapter", None, "[1.0]").into_embedding().is_err());
    }
}
