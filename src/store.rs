//! Postgres/pgvector document store used by the vectorstore and chat
//! handlers.
//!
//! Each node owns its own connection pool; pipeline stages never share
//! database state. The schema is created on first use and holds every
//! collection in one table, discriminated by the `collection` column.
//! Embeddings are passed as pgvector literals (`'[0.1,0.2,...]'::vector`)
//! so no client-side vector extension type is required.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

use crate::envelope::Document;

/// A document returned by similarity search.
#[derive(Clone, Debug)]
pub struct StoredDocument {
    pub id: Uuid,
    pub page_content: String,
    pub metadata: Value,
}

/// Storage seam between the vectorstore/chat handlers and the database.
///
/// Handlers only see this trait, so their embed/search/report flows are
/// testable without a running Postgres.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the collection this store reads and writes.
    fn collection(&self) -> &str;

    /// Inserts documents with their embeddings; returns the number stored.
    async fn add_documents(
        &self,
        docs: &[Document],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, sqlx::Error>;

    /// Returns the `k` documents nearest to `embedding` by cosine distance,
    /// optionally restricted to rows whose metadata contains `filter`.
    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &Value,
    ) -> Result<Vec<StoredDocument>, sqlx::Error>;
}

/// Handle to one pgvector collection.
#[derive(Debug)]
pub struct PgVectorStore {
    pool: PgPool,
    collection: String,
    schema_ready: OnceCell<()>,
}

impl PgVectorStore {
    /// Creates the store without connecting; the pool connects on first
    /// query, so constructing a node does not require the database to be up.
    pub fn connect_lazy(url: &str, collection: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(4).connect_lazy(url)?;
        Ok(Self {
            pool,
            collection: collection.to_string(),
            schema_ready: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
                    .execute(&self.pool)
                    .await?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS ragbus_documents (
                        id UUID PRIMARY KEY,
                        collection TEXT NOT NULL,
                        page_content TEXT NOT NULL,
                        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                        embedding VECTOR NOT NULL
                    )",
                )
                .execute(&self.pool)
                .await?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS ragbus_documents_collection_idx
                     ON ragbus_documents (collection)",
                )
                .execute(&self.pool)
                .await?;
                debug!("vector store schema ready");
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl DocumentStore for PgVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn add_documents(
        &self,
        docs: &[Document],
        embeddings: &[Vec<f32>],
    ) -> Result<usize, sqlx::Error> {
        debug_assert_eq!(docs.len(), embeddings.len());
        self.ensure_schema().await?;

        for (doc, embedding) in docs.iter().zip(embeddings) {
            let metadata =
                serde_json::to_value(&doc.metadata).unwrap_or_else(|_| Value::Object(Default::default()));
            sqlx::query(
                "INSERT INTO ragbus_documents (id, collection, page_content, metadata, embedding)
                 VALUES ($1, $2, $3, $4, $5::vector)",
            )
            .bind(Uuid::new_v4())
            .bind(&self.collection)
            .bind(&doc.page_content)
            .bind(metadata)
            .bind(vector_literal(embedding))
            .execute(&self.pool)
            .await?;
        }
        Ok(docs.len())
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &Value,
    ) -> Result<Vec<StoredDocument>, sqlx::Error> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT id, page_content, metadata
             FROM ragbus_documents
             WHERE collection = $1
               AND ($2::jsonb = '{}'::jsonb OR metadata @> $2::jsonb)
             ORDER BY embedding <=> $3::vector
             LIMIT $4",
        )
        .bind(&self.collection)
        .bind(filter.clone())
        .bind(vector_literal(embedding))
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredDocument {
                id: row.get("id"),
                page_content: row.get("page_content"),
                metadata: row.get("metadata"),
            })
            .collect())
    }
}

/// Renders an embedding as a pgvector literal.
fn vector_literal(embedding: &[f32]) -> String {
    let mut literal = String::with_capacity(embedding.len() * 10 + 2);
    literal.push('[');
    for (idx, value) in embedding.iter().enumerate() {
        if idx > 0 {
            literal.push(',');
        }
        literal.push_str(&value.to_string());
    }
    literal.push(']');
    literal
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_formats_pgvector_syntax() {
        assert_eq!(vector_literal(&[0.1, -0.25, 3.0]), "[0.1,-0.25,3]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[tokio::test]
    async fn connect_lazy_does_not_require_a_database() {
        let store =
            PgVectorStore::connect_lazy("postgres://user:pw@localhost:5432/db", "docs").unwrap();
        assert_eq!(store.collection(), "docs");
    }
}
