//! Repository pattern for database operations
//!
//! Implements the embedding store, the recommendation sink, and the run
//! reader against PostgreSQL. Vector columns are pgvector and are read
//! through raw SQL as text.

use crate::db::models::*;
use crate::db::DbPool;
use crate::embeddings::{CorpusId, Embedding, EmbeddingFilter, EmbeddingStore, PaperId};
use crate::errors::{AppError, ErrorCode, Result};
use crate::recommendations::{
    ensure_unique_papers, NewRun, Recommendation, RecommendationRow, RecommendationRun,
    RecommendationSink, RunId, RunReader, RunStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

const EMBEDDING_COLUMNS: &str = r#"
    e.id,
    e.paper_id,
    e.section_id,
    e.type,
    e.model_name,
    e.embedding::text AS embedding,
    e.created_at
"#;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Embedding Queries
    // ========================================================================

    async fn query_embeddings(&self, sql: String, values: Vec<sea_orm::Value>) -> Result<Vec<Embedding>> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);
        EmbeddingRow::find_by_statement(stmt)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(EmbeddingRow::into_embedding)
            .collect()
    }

    fn filter_values(filter: &EmbeddingFilter) -> (Option<String>, Option<String>) {
        (
            filter.kind.map(|k| k.as_str().to_string()),
            filter.model_name.clone(),
        )
    }

    // ========================================================================
    // Run Transitions
    // ========================================================================

    /// Load a run row, locking it when called inside a transaction
    async fn load_run<C: ConnectionTrait>(conn: &C, run_id: RunId) -> Result<RecommendationRunRow> {
        RecommendationRunEntity::find_by_id(run_id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or(AppError::RunNotFound { id: run_id })
    }

    async fn transition<C: ConnectionTrait>(
        conn: &C,
        run_id: RunId,
        next: RunStatus,
    ) -> Result<RecommendationRunActiveModel> {
        let row = Self::load_run(conn, run_id).await?;
        let current = row.run_status()?;
        if !current.can_transition_to(next) {
            return Err(current.transition_error(run_id, next));
        }
        let mut run: RecommendationRunActiveModel = row.into();
        run.status = Set(next.as_str().to_string());
        Ok(run)
    }

    async fn insert_rows<C: ConnectionTrait>(
        conn: &C,
        run_id: RunId,
        rows: &[RecommendationRow],
    ) -> Result<()> {
        let run = Self::load_run(conn, run_id).await?;
        if run.run_status()? != RunStatus::Computing {
            return Err(AppError::InvalidRunTransition {
                run_id,
                from: run.status,
                to: "rows written".to_string(),
            });
        }
        ensure_unique_papers(run_id, rows)?;
        if rows.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let models = rows.iter().map(|row| RecommendationActiveModel {
            run_id: Set(run_id),
            paper_id: Set(row.paper_id),
            score: Set(row.score as f64),
            rank: Set(row.rank as i32),
            created_at: Set(now.into()),
            ..Default::default()
        });

        // The unique (run_id, paper_id) index rejects the whole statement
        RecommendationEntity::insert_many(models).exec(conn).await?;
        Ok(())
    }

    async fn complete<C: ConnectionTrait>(
        conn: &C,
        run_id: RunId,
        completed_at: DateTime<Utc>,
        degenerate_vectors: u64,
    ) -> Result<()> {
        let mut run = Self::transition(conn, run_id, RunStatus::Persisted).await?;
        run.completed_at = Set(Some(completed_at.into()));
        run.degenerate_vectors = Set(degenerate_vectors as i64);
        run.update(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl EmbeddingStore for Repository {
    #[instrument(skip(self, filter), fields(kind = ?filter.kind))]
    async fn get_embeddings(
        &self,
        corpus_id: CorpusId,
        filter: &EmbeddingFilter,
    ) -> Result<Vec<Embedding>> {
        let (kind, model) = Self::filter_values(filter);
        let sql = format!(
            r#"
            SELECT {EMBEDDING_COLUMNS}
            FROM embeddings e
            JOIN papers p ON e.paper_id = p.id
            WHERE p.corpus_id = $1
              AND ($2::text IS NULL OR e.type = $2)
              AND ($3::text IS NULL OR e.model_name = $3)
            ORDER BY e.paper_id, e.type, e.section_id NULLS FIRST, e.id
            "#
        );

        let embeddings = self
            .query_embeddings(sql, vec![corpus_id.into(), kind.into(), model.into()])
            .await?;
        debug!(count = embeddings.len(), "Fetched corpus embeddings");
        Ok(embeddings)
    }

    async fn list_papers(&self, corpus_id: CorpusId) -> Result<Vec<PaperId>> {
        PaperEntity::find()
            .select_only()
            .column(PaperColumn::Id)
            .filter(PaperColumn::CorpusId.eq(corpus_id))
            .order_by_asc(PaperColumn::Id)
            .into_tuple::<i64>()
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    #[instrument(skip(self, paper_ids, filter), fields(papers = paper_ids.len()))]
    async fn get_paper_embeddings(
        &self,
        corpus_id: CorpusId,
        paper_ids: &[PaperId],
        filter: &EmbeddingFilter,
    ) -> Result<Vec<Embedding>> {
        let (Some(&low), Some(&high)) = (paper_ids.iter().min(), paper_ids.iter().max()) else {
            return Ok(Vec::new());
        };

        // Batches are contiguous slices of the sorted paper list, so the id
        // range covers exactly the batch; the set check guards other callers.
        let (kind, model) = Self::filter_values(filter);
        let sql = format!(
            r#"
            SELECT {EMBEDDING_COLUMNS}
            FROM embeddings e
            JOIN papers p ON e.paper_id = p.id
            WHERE p.corpus_id = $1
              AND e.paper_id BETWEEN $2 AND $3
              AND ($4::text IS NULL OR e.type = $4)
              AND ($5::text IS NULL OR e.model_name = $5)
            ORDER BY e.paper_id, e.type, e.section_id NULLS FIRST, e.id
            "#
        );

        let wanted: HashSet<PaperId> = paper_ids.iter().copied().collect();
        let embeddings = self
            .query_embeddings(
                sql,
                vec![corpus_id.into(), low.into(), high.into(), kind.into(), model.into()],
            )
            .await?
            .into_iter()
            .filter(|e| wanted.contains(&e.paper_id))
            .collect();
        Ok(embeddings)
    }
}

#[async_trait]
impl RecommendationSink for Repository {
    #[instrument(skip(self, run), fields(reference = run.reference_corpus_id, candidate = run.candidate_corpus_id))]
    async fn create_run(&self, run: NewRun) -> Result<RunId> {
        let model = RecommendationRunActiveModel {
            reference_corpus_id: Set(run.reference_corpus_id),
            candidate_corpus_id: Set(run.candidate_corpus_id),
            threshold_level: Set(run.threshold_level),
            method: Set(run.method),
            status: Set(RunStatus::Created.as_str().to_string()),
            error_code: Set(None),
            error_message: Set(None),
            degenerate_vectors: Set(0),
            created_at: Set(Utc::now().into()),
            completed_at: Set(None),
            ..Default::default()
        };

        let inserted = model.insert(self.write_conn()).await?;
        Ok(inserted.id)
    }

    async fn mark_computing(&self, run_id: RunId) -> Result<()> {
        let txn = self.write_conn().begin().await?;
        let run = Self::transition(&txn, run_id, RunStatus::Computing).await?;
        run.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn write_recommendations(&self, run_id: RunId, rows: &[RecommendationRow]) -> Result<()> {
        let txn = self.write_conn().begin().await?;
        Self::insert_rows(&txn, run_id, rows).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: RunId,
        completed_at: DateTime<Utc>,
        degenerate_vectors: u64,
    ) -> Result<()> {
        let txn = self.write_conn().begin().await?;
        Self::complete(&txn, run_id, completed_at, degenerate_vectors).await?;
        txn.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn fail_run(&self, run_id: RunId, code: ErrorCode, message: &str) -> Result<()> {
        let txn = self.write_conn().begin().await?;
        let mut run = Self::transition(&txn, run_id, RunStatus::Failed).await?;
        run.error_code = Set(Some(code.as_str().to_string()));
        run.error_message = Set(Some(message.to_string()));
        run.update(&txn).await?;

        let removed = RecommendationEntity::delete_many()
            .filter(RecommendationColumn::RunId.eq(run_id))
            .exec(&txn)
            .await?;
        if removed.rows_affected > 0 {
            warn!(rows = removed.rows_affected, "Removed rows of failed run");
        }

        txn.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn finalize_run(
        &self,
        run_id: RunId,
        rows: &[RecommendationRow],
        completed_at: DateTime<Utc>,
        degenerate_vectors: u64,
    ) -> Result<()> {
        // Dropping the transaction on any error rolls both steps back
        let txn = self.write_conn().begin().await?;
        Self::insert_rows(&txn, run_id, rows).await?;
        Self::complete(&txn, run_id, completed_at, degenerate_vectors).await?;
        txn.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl RunReader for Repository {
    async fn get_run(&self, run_id: RunId) -> Result<Option<RecommendationRun>> {
        RecommendationRunEntity::find_by_id(run_id)
            .one(self.read_conn())
            .await?
            .map(RecommendationRunRow::into_run)
            .transpose()
    }

    async fn list_recommendations(&self, run_id: RunId) -> Result<Vec<Recommendation>> {
        let rows = RecommendationEntity::find()
            .filter(RecommendationColumn::RunId.eq(run_id))
            .order_by_asc(RecommendationColumn::Rank)
            .all(self.read_conn())
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_completed_run(
        &self,
        reference_corpus_id: CorpusId,
        candidate_corpus_id: CorpusId,
    ) -> Result<Option<RecommendationRun>> {
        RecommendationRunEntity::find()
            .filter(RecommendationRunColumn::ReferenceCorpusId.eq(reference_corpus_id))
            .filter(RecommendationRunColumn::CandidateCorpusId.eq(candidate_corpus_id))
            .filter(RecommendationRunColumn::Status.eq(RunStatus::Persisted.as_str()))
            .filter(RecommendationRunColumn::CompletedAt.is_not_null())
            .order_by_desc(RecommendationRunColumn::CompletedAt)
            .order_by_desc(RecommendationRunColumn::Id)
            .one(self.read_conn())
            .await?
            .map(RecommendationRunRow::into_run)
            .transpose()
    }
}
