//! Recommendation entity; `(run_id, paper_id)` is unique

use crate::recommendations::Recommendation;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recommendations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub run_id: i64,

    pub paper_id: i64,

    pub score: f64,

    pub rank: i32,

    pub created_at: DateTimeWithTimeZone,
}

impl From<Model> for Recommendation {
    fn from(row: Model) -> Self {
        Recommendation {
            run_id: row.run_id,
            paper_id: row.paper_id,
            score: row.score as f32,
            rank: row.rank.max(0) as u32,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::recommendation_run::Entity",
        from = "Column::RunId",
        to = "super::recommendation_run::Column::Id",
        on_delete = "Cascade"
    )]
    Run,
}

impl Related<super::recommendation_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
