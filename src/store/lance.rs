//! LanceDB adapter.
//!
//! One table, `chunks`, inside the persist directory:
//!
//! | column        | type                        |
//! |---------------|-----------------------------|
//! | `id`          | utf8                        |
//! | `text`        | utf8                        |
//! | `source_path` | utf8                        |
//! | `metadata`    | utf8 (JSON `ChunkMetadata`) |
//! | `vector`      | fixed_size_list<f32>[dim]   |
//!
//! The table is created on the first `add`, with the width of that batch's
//! embeddings. An upsert deletes the incoming ids and appends the batch.

use super::{check_batch, check_dimension, summarize, VectorStore};
use crate::error::StoreError;
use crate::output::{ChunkMetadata, SearchResult, StoreStats};
use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};
use arrow_array::{Array, ArrayRef, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Name of the chunk table inside the persist directory.
pub const TABLE_NAME: &str = "chunks";

/// Vector store backed by an embedded LanceDB database.
pub struct LanceVectorStore {
    dir: PathBuf,
    connection: Connection,
    table: RwLock<Option<Table>>,
}

impl std::fmt::Debug for LanceVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceVectorStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

fn db_err(context: &'static str) -> impl Fn(lancedb::Error) -> StoreError {
    move |e| StoreError::Database(format!("{context}: {e}"))
}

impl LanceVectorStore {
    /// Open (or create) the database in `persist_dir`.
    pub async fn open(persist_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = persist_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        let connection = connect(&dir.to_string_lossy())
            .execute()
            .await
            .map_err(db_err("cannot open database"))?;
        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(db_err("cannot list tables"))?;
        let table = if names.iter().any(|n| n == TABLE_NAME) {
            Some(
                connection
                    .open_table(TABLE_NAME)
                    .execute()
                    .await
                    .map_err(db_err("cannot open chunk table"))?,
            )
        } else {
            None
        };

        let store = Self {
            dir,
            connection,
            table: RwLock::new(table),
        };
        info!(
            "Opened vector store {} ({} chunks)",
            store.dir.display(),
            store.count().await?
        );
        Ok(store)
    }

    /// The persist directory holding the database.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    async fn table(&self) -> Option<Table> {
        self.table.read().await.clone()
    }

    async fn table_dimension(table: &Table) -> Result<Option<usize>, StoreError> {
        let schema = table.schema().await.map_err(db_err("cannot read schema"))?;
        Ok(schema
            .field_with_name("vector")
            .ok()
            .and_then(|f| match f.data_type() {
                DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
                _ => None,
            }))
    }
}

fn schema(dimension: usize) -> Result<Schema, StoreError> {
    let width = i32::try_from(dimension).map_err(|_| StoreError::DimensionMismatch {
        expected: i32::MAX as usize,
        actual: dimension,
    })?;
    Ok(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("source_path", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), width),
            false,
        ),
    ]))
}

fn vector_array(embeddings: &[Vec<f32>], dimension: i32) -> ArrayRef {
    let mut builder = FixedSizeListBuilder::new(Float32Builder::new(), dimension);
    for embedding in embeddings {
        builder.values().append_slice(embedding);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

fn to_batch(
    schema: Arc<Schema>,
    ids: Vec<String>,
    texts: Vec<String>,
    embeddings: &[Vec<f32>],
    metadatas: &[ChunkMetadata],
) -> Result<RecordBatch, StoreError> {
    let dimension = match schema.field_with_name("vector").map(|f| f.data_type().clone()) {
        Ok(DataType::FixedSizeList(_, n)) => n,
        _ => return Err(StoreError::Database("chunk table has no vector column".into())),
    };
    let sources: Vec<String> = metadatas.iter().map(|m| m.source_path.clone()).collect();
    let encoded = metadatas
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(encoded)),
            vector_array(embeddings, dimension),
        ],
    )
    .map_err(|e| StoreError::Database(format!("cannot build record batch: {e}")))
}

/// SQL string literal with single quotes doubled.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StoreError::Database(format!("result is missing column '{name}'")))
}

fn decode_metadata(raw: &str) -> Result<ChunkMetadata, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn batch_to_results(batch: &RecordBatch) -> Result<Vec<SearchResult>, StoreError> {
    let texts = string_column(batch, "text")?;
    let metadatas = string_column(batch, "metadata")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    (0..batch.num_rows())
        .map(|i| {
            // Cosine distance is 1 - similarity.
            let score = distances
                .filter(|d| !d.is_null(i))
                .map_or(0.0, |d| (1.0 - d.value(i)).clamp(0.0, 1.0));
            Ok(SearchResult {
                content: texts.value(i).to_string(),
                score,
                metadata: decode_metadata(metadatas.value(i))?,
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn add(
        &self,
        ids: Vec<String>,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<(), StoreError> {
        check_batch(&ids, &texts, &embeddings, &metadatas)?;
        if ids.is_empty() {
            return Ok(());
        }

        let mut slot = self.table.write().await;
        let table = match slot.as_ref() {
            Some(t) => {
                check_dimension(Self::table_dimension(t).await?, &embeddings)?;
                t.clone()
            }
            None => {
                let dimension = check_dimension(None, &embeddings)?.unwrap_or_default();
                info!("Creating chunk table ({} dimensions)", dimension);
                let t = self
                    .connection
                    .create_empty_table(TABLE_NAME, Arc::new(schema(dimension)?))
                    .execute()
                    .await
                    .map_err(db_err("cannot create chunk table"))?;
                *slot = Some(t.clone());
                t
            }
        };

        let existing = ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(", ");
        table
            .delete(&format!("id IN ({existing})"))
            .await
            .map_err(db_err("cannot replace existing chunks"))?;

        let n = ids.len();
        let schema = table.schema().await.map_err(db_err("cannot read schema"))?;
        let batch = to_batch(schema.clone(), ids, texts, &embeddings, &metadatas)?;
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(db_err("cannot insert chunks"))?;
        debug!("Stored {} chunks in {}", n, self.dir.display());
        Ok(())
    }

    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<SearchResult>, StoreError> {
        let Some(table) = self.table().await else {
            return Ok(Vec::new());
        };
        if n_results == 0 {
            return Ok(Vec::new());
        }
        check_dimension(Self::table_dimension(&table).await?, &[embedding.to_vec()])?;

        let mut stream = table
            .vector_search(embedding.to_vec())
            .map_err(db_err("cannot build vector query"))?
            .distance_type(DistanceType::Cosine)
            .limit(n_results)
            .execute()
            .await
            .map_err(db_err("vector query failed"))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(db_err("cannot read query results"))?
        {
            results.extend(batch_to_results(&batch)?);
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(n_results);
        Ok(results)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        match self.table().await {
            Some(t) => t.count_rows(None).await.map_err(db_err("cannot count chunks")),
            None => Ok(0),
        }
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let Some(table) = self.table().await else {
            return Ok(StoreStats::default());
        };
        let dimension = Self::table_dimension(&table).await?;
        let total = table.count_rows(None).await.map_err(db_err("cannot count chunks"))?;
        if total == 0 {
            return Ok(summarize(std::iter::empty(), dimension));
        }

        let mut stream = table
            .query()
            .limit(total)
            .execute()
            .await
            .map_err(db_err("cannot scan chunks"))?;
        let mut metadatas = Vec::with_capacity(total);
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(db_err("cannot read chunks"))?
        {
            let column = string_column(&batch, "metadata")?;
            for i in 0..batch.num_rows() {
                metadatas.push(decode_metadata(column.value(i))?);
            }
        }
        Ok(summarize(metadatas.iter(), dimension))
    }

    async fn delete_by_source(&self, source_path: &str) -> Result<usize, StoreError> {
        let Some(table) = self.table().await else {
            return Ok(0);
        };
        let filter = format!("source_path = {}", quote(source_path));
        let n = table
            .count_rows(Some(filter.clone()))
            .await
            .map_err(db_err("cannot count chunks"))?;
        if n > 0 {
            table
                .delete(&filter)
                .await
                .map_err(db_err("cannot delete chunks"))?;
            debug!("Removed {} stale chunks of {}", n, source_path);
        }
        Ok(n)
    }

    /// Delete every row. The table and its vector width are kept.
    async fn clear(&self) -> Result<(), StoreError> {
        if let Some(table) = self.table().await {
            table
                .delete("true")
                .await
                .map_err(db_err("cannot clear chunks"))?;
        }
        info!("Cleared vector store {}", self.dir.display());
        Ok(())
    }
}
