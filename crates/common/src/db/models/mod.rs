//! SeaORM entity models
//!
//! Database entities for papers, their embeddings, and recommendation runs

mod paper;
mod embedding;
mod recommendation_run;
mod recommendation;

pub use paper::{
    Entity as PaperEntity,
    Model as Paper,
    ActiveModel as PaperActiveModel,
    Column as PaperColumn,
};

pub use embedding::{
    Entity as EmbeddingEntity,
    Model as EmbeddingRow,
    ActiveModel as EmbeddingActiveModel,
    Column as EmbeddingColumn,
};

pub use recommendation_run::{
    Entity as RecommendationRunEntity,
    Model as RecommendationRunRow,
    ActiveModel as RecommendationRunActiveModel,
    Column as RecommendationRunColumn,
};

pub use recommendation::{
    Entity as RecommendationEntity,
    Model as RecommendationRecord,
    ActiveModel as RecommendationActiveModel,
    Column as RecommendationColumn,
};
