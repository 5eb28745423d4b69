use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{CreateEmbeddingRequest, EmbeddingInput},
    Client as OpenAIClient,
};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use log::debug;
use pgvector::{Vector, VectorExpressionMethods};

use crate::database::db::DbPool;
use crate::schema::kb_chunks;

/// One ranked passage returned by the knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub content: String,
    pub source: String,
}

/// The retrieval side of the RAG path, consumed as an opaque capability:
/// given a query string, return ranked passages with source identifiers.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Passage>>;
}

pub struct PgVectorRetriever {
    pool: DbPool,
    openai: OpenAIClient<OpenAIConfig>,
    limit: i64,
}

impl PgVectorRetriever {
    pub fn new(pool: DbPool) -> Self {
        PgVectorRetriever {
            pool,
            openai: OpenAIClient::new(),
            limit: 5,
        }
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vector> {
        let request = CreateEmbeddingRequest {
            model: "text-embedding-3-small".to_string(),
            input: EmbeddingInput::String(text.to_string()),
            ..Default::default()
        };

        let response = self.openai.embeddings().create(request).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding response was empty"))?;

        Ok(Vector::from(embedding.embedding))
    }
}

#[async_trait]
impl RetrievalClient for PgVectorRetriever {
    async fn search(&self, query: &str) -> Result<Vec<Passage>> {
        debug!("searching knowledge base for: {query}");
        let query_embedding = self.generate_embedding(query).await?;

        let mut conn = self.pool.get().await?;
        let rows: Vec<(String, String)> = kb_chunks::table
            .filter(kb_chunks::embedding.is_not_null())
            .order(kb_chunks::embedding.cosine_distance(&query_embedding))
            .select((kb_chunks::content, kb_chunks::source))
            .limit(self.limit)
            .load(&mut conn)
            .await?;

        debug!("found {} relevant chunks", rows.len());
        Ok(rows
            .into_iter()
            .map(|(content, source)| Passage { content, source })
            .collect())
    }
}
