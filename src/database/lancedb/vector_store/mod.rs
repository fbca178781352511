
use super::{IndexedVector, Neighbor};
use crate::{CacheError, Result};
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    database::CreateTableMode,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TABLE_NAME: &str = "questions";

/// The only metric the index is ever searched with. LanceDB reports L2 as the
/// squared Euclidean distance.
pub const DISTANCE_TYPE: DistanceType = DistanceType::L2;

/// Nearest-neighbor index over promoted question embeddings.
///
/// The LanceDB table is created lazily on the first insert, sized to that
/// vector's dimension. Every insert is committed as a new table version, so
/// there is no separate save step.
pub struct VectorIndex {
    connection: Connection,
    table_name: String,
    table: Option<Table>,
    dimension: Option<usize>,
    entries: usize,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("table_name", &self.table_name)
            .field("dimension", &self.dimension)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Open the index stored under `path`.
    ///
    /// A missing directory or table is a cold start. A table that exists but
    /// cannot be read is reported as [`CacheError::IndexCorrupt`].
    #[inline]
    pub async fn open(path: &Path) -> Result<Self> {
        debug!("Opening vector index at path: {:?}", path);

        std::fs::create_dir_all(path)?;

        let uri = format!("file://{}", path.display());
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            CacheError::IndexCorrupt(format!("Failed to connect to LanceDB: {}", e))
        })?;

        let mut index = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            table: None,
            dimension: None,
            entries: 0,
        };
        index.load_existing_table().await?;

        info!(
            "Vector index opened with {} entries (dimension {:?})",
            index.entries, index.dimension
        );
        Ok(index)
    }

    async fn load_existing_table(&mut self) -> Result<()> {
        let table_names = self.connection.table_names().execute().await.map_err(|e| {
            CacheError::IndexCorrupt(format!("Failed to list tables: {}", e))
        })?;

        if !table_names.contains(&self.table_name) {
            debug!("No questions table yet, index starts empty");
            return Ok(());
        }

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| CacheError::IndexCorrupt(format!("Failed to open table: {}", e)))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| CacheError::IndexCorrupt(format!("Failed to get table schema: {}", e)))?;

        let dimension = Self::validate_schema(&schema)?;

        let entries = table
            .count_rows(None)
            .await
            .map_err(|e| CacheError::IndexCorrupt(format!("Failed to count rows: {}", e)))?;

        self.table = Some(table);
        self.dimension = Some(dimension);
        self.entries = entries;
        Ok(())
    }

    /// Check the stored schema and return the vector dimension
    fn validate_schema(schema: &Schema) -> Result<usize> {
        let id_field = schema
            .field_with_name("id")
            .map_err(|_| CacheError::IndexCorrupt("Missing id column".to_string()))?;
        if id_field.data_type() != &DataType::Utf8 {
            return Err(CacheError::IndexCorrupt(format!(
                "Invalid id column type: {}",
                id_field.data_type()
            )));
        }

        let vector_field = schema
            .field_with_name("vector")
            .map_err(|_| CacheError::IndexCorrupt("Missing vector column".to_string()))?;
        match vector_field.data_type() {
            DataType::FixedSizeList(item, size)
                if item.data_type() == &DataType::Float32 && *size > 0 =>
            {
                usize::try_from(*size).map_err(|_| {
                    CacheError::IndexCorrupt(format!("Invalid vector dimension: {}", size))
                })
            }
            other => Err(CacheError::IndexCorrupt(format!(
                "Invalid vector column type: {}",
                other
            ))),
        }
    }

    fn create_schema(vector_dim: usize) -> Result<Arc<Schema>> {
        let size = i32::try_from(vector_dim).map_err(|_| {
            CacheError::InconsistentState(format!("Vector dimension too large: {}", vector_dim))
        })?;

        Ok(Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    size,
                ),
                false,
            ),
            Field::new("created_at", DataType::Utf8, false),
        ])))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Dimension of the stored vectors, `None` until the first insert
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Return up to `k` entries closest to `query_vector`, nearest first.
    ///
    /// An empty index yields an empty result rather than an error.
    #[inline]
    pub async fn nearest_neighbors(&self, query_vector: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let Some(table) = self.table.as_ref().filter(|_| self.entries > 0 && k > 0) else {
            return Ok(Vec::new());
        };

        if self.dimension != Some(query_vector.len()) {
            return Err(CacheError::InconsistentState(format!(
                "Query vector has {} dimensions, index stores {:?}",
                query_vector.len(),
                self.dimension
            )));
        }

        debug!("Searching for {} nearest neighbors", k);

        let results = table
            .vector_search(query_vector)
            .map_err(|e| CacheError::IndexCorrupt(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DISTANCE_TYPE)
            .limit(k)
            .execute()
            .await
            .map_err(|e| CacheError::IndexCorrupt(format!("Failed to execute search: {}", e)))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| CacheError::IndexCorrupt(format!("Failed to read result stream: {}", e)))?;

        let mut neighbors = Vec::new();
        for batch in &batches {
            neighbors.extend(Self::parse_neighbor_batch(batch)?);
        }

        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);

        debug!("Found {} neighbors", neighbors.len());
        Ok(neighbors)
    }

    fn parse_neighbor_batch(batch: &RecordBatch) -> Result<Vec<Neighbor>> {
        let ids = Self::string_column(batch, "id")?;

        let distances = batch
            .column_by_name("_distance")
            .ok_or_else(|| CacheError::IndexCorrupt("Missing _distance column".to_string()))?
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| CacheError::IndexCorrupt("Invalid _distance column type".to_string()))?;

        Ok((0..batch.num_rows())
            .map(|row| Neighbor {
                id: ids.value(row).to_string(),
                distance: if distances.is_null(row) {
                    f32::INFINITY
                } else {
                    distances.value(row)
                },
            })
            .collect())
    }

    fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
        batch
            .column_by_name(name)
            .ok_or_else(|| CacheError::IndexCorrupt(format!("Missing {} column", name)))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| CacheError::IndexCorrupt(format!("Invalid {} column type", name)))
    }

    /// Add one vector. Callers must not insert the same id twice.
    #[inline]
    pub async fn insert(&mut self, record: IndexedVector) -> Result<()> {
        self.insert_batch(vec![record]).await
    }

    async fn insert_batch(&mut self, records: Vec<IndexedVector>) -> Result<()> {
        let Some(first) = records.first() else {
            debug!("No vectors to insert");
            return Ok(());
        };

        let vector_dim = first.vector.len();
        Self::check_dimensions(&records, vector_dim)?;

        let table = match (&self.table, self.dimension) {
            (Some(table), Some(dim)) if dim == vector_dim => table.clone(),
            (Some(_), dim) => {
                return Err(CacheError::InconsistentState(format!(
                    "Vector has {} dimensions, index stores {:?}",
                    vector_dim, dim
                )));
            }
            (None, _) => self.create_table(vector_dim).await?,
        };

        let count = records.len();
        let record_batch = Self::create_record_batch(&records, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| CacheError::Persistence(format!("Failed to insert vectors: {}", e)))?;

        self.entries += count;
        debug!("Inserted {} vectors, index now holds {}", count, self.entries);
        Ok(())
    }

    async fn create_table(&mut self, vector_dim: usize) -> Result<Table> {
        info!("Creating questions table with {} dimensions", vector_dim);

        let table = self
            .connection
            .create_empty_table(&self.table_name, Self::create_schema(vector_dim)?)
            .execute()
            .await
            .map_err(|e| CacheError::Persistence(format!("Failed to create table: {}", e)))?;

        self.table = Some(table.clone());
        self.dimension = Some(vector_dim);
        self.entries = 0;
        Ok(table)
    }

    fn check_dimensions(records: &[IndexedVector], vector_dim: usize) -> Result<()> {
        if vector_dim == 0 {
            return Err(CacheError::InconsistentState(
                "Cannot index an empty vector".to_string(),
            ));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != vector_dim) {
            return Err(CacheError::InconsistentState(format!(
                "Vector for {} has {} dimensions, expected {}",
                bad.id,
                bad.vector.len(),
                vector_dim
            )));
        }
        Ok(())
    }

    fn create_record_batch(records: &[IndexedVector], vector_dim: usize) -> Result<RecordBatch> {
        let mut flat_values = Vec::with_capacity(records.len() * vector_dim);
        for record in records {
            flat_values.extend_from_slice(&record.vector);
        }

        let size = i32::try_from(vector_dim).map_err(|_| {
            CacheError::InconsistentState(format!("Vector dimension too large: {}", vector_dim))
        })?;
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            size,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| CacheError::Persistence(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.id.as_str()),
            )),
            Arc::new(vector_array),
            Arc::new(StringArray::from_iter_values(
                records.iter().map(|r| r.created_at.as_str()),
            )),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim)?, arrays)
            .map_err(|e| CacheError::Persistence(format!("Failed to create record batch: {}", e)))
    }

    /// List the linked ids of every stored vector
    #[inline]
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let Some(table) = self.table.as_ref().filter(|_| self.entries > 0) else {
            return Ok(Vec::new());
        };

        let results = table
            .query()
            .select(Select::Columns(vec!["id".to_string()]))
            .limit(self.entries)
            .execute()
            .await
            .map_err(|e| CacheError::IndexCorrupt(format!("Failed to list vector ids: {}", e)))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| CacheError::IndexCorrupt(format!("Failed to read id stream: {}", e)))?;

        let mut ids = Vec::with_capacity(self.entries);
        for batch in &batches {
            let column = Self::string_column(batch, "id")?;
            ids.extend((0..batch.num_rows()).map(|row| column.value(row).to_string()));
        }

        Ok(ids)
    }

    /// Replace the whole index with `records`.
    ///
    /// The new contents are written as one overwriting table version, so a
    /// failed rebuild leaves the previous entries in place. With no records
    /// the table is dropped and the index returns to the not-yet-created
    /// state.
    #[inline]
    pub async fn rebuild(&mut self, records: Vec<IndexedVector>) -> Result<()> {
        info!("Rebuilding vector index with {} entries", records.len());

        let Some(first) = records.first() else {
            self.drop_table_if_exists().await?;
            self.table = None;
            self.dimension = None;
            self.entries = 0;
            return Ok(());
        };

        let vector_dim = first.vector.len();
        Self::check_dimensions(&records, vector_dim)?;

        let record_batch = Self::create_record_batch(&records, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        let table = self
            .connection
            .create_table(self.table_name.as_str(), reader)
            .mode(CreateTableMode::Overwrite)
            .execute()
            .await
            .map_err(|e| CacheError::Persistence(format!("Failed to overwrite table: {}", e)))?;

        self.table = Some(table);
        self.dimension = Some(vector_dim);
        self.entries = records.len();
        Ok(())
    }

    async fn drop_table_if_exists(&self) -> Result<()> {
        let table_names = self.connection.table_names().execute().await.map_err(|e| {
            CacheError::Persistence(format!("Failed to list tables for drop: {}", e))
        })?;

        if table_names.contains(&self.table_name) {
            info!("Dropping existing questions table");
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| CacheError::Persistence(format!("Failed to drop table: {}", e)))?;
        }

        Ok(())
    }

    /// Compact the table's data files
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        let Some(table) = &self.table else {
            warn!("Nothing to optimize, vector index has no table yet");
            return Ok(());
        };

        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| CacheError::Persistence(format!("Failed to optimize table: {}", e)))?;

        info!("Vector index optimization completed");
        Ok(())
    }
}
