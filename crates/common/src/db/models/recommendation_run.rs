//! Recommendation run entity

use crate::errors::Result as AppResult;
use crate::recommendations::{RecommendationRun, RunStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recommendation_runs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub reference_corpus_id: i64,

    pub candidate_corpus_id: i64,

    #[sea_orm(column_type = "Text")]
    pub threshold_level: String,

    #[sea_orm(column_type = "Text")]
    pub method: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_code: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    /// Vectors skipped for zero magnitude
    pub degenerate_vectors: i64,

    pub created_at: DateTimeWithTimeZone,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the run status as an enum
    pub fn run_status(&self) -> AppResult<RunStatus> {
        self.status.parse()
    }

    pub fn into_run(self) -> AppResult<RecommendationRun> {
        let status = self.run_status()?;
        Ok(RecommendationRun {
            id: self.id,
            reference_corpus_id: self.reference_corpus_id,
            candidate_corpus_id: self.candidate_corpus_id,
            threshold_level: self.threshold_level,
            method: self.method,
            status,
            error_code: self.error_code,
            error_message: self.error_message,
            degenerate_vectors: self.degenerate_vectors,
            created_at: self.created_at.into(),
            completed_at: self.completed_at.map(Into::into),
        })
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::recommendation::Entity")]
    Recommendations,
}

impl Related<super::recommendation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recommendations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
