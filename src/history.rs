use crate::data::history_schema;
use crate::error::Error;
use datafusion::arrow::array::RecordBatch;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::prelude::{DataFrame, ParquetReadOptions, SessionContext};
use std::fs;
use std::path::PathBuf;

#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Loads the persisted analytics table once, as the run's immutable
    /// snapshot. Writes landing in the store after this call are not seen
    /// by the current run.
    async fn load(&self, ctx: &SessionContext) -> Result<DataFrame, Error>;

    /// Appends a delta as a new part. Insert-only; identities are assigned
    /// by the store, not by us.
    async fn append(&self, delta: DataFrame, part_name: &str) -> Result<(), Error>;
}

/// Parquet-parts implementation: the table is the union of every
/// `*.parquet` file in one directory.
pub struct ParquetHistoryStore {
    dir: PathBuf,
}

impl ParquetHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ParquetHistoryStore { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl HistoryStore for ParquetHistoryStore {
    async fn load(&self, ctx: &SessionContext) -> Result<DataFrame, Error> {
        let schema = history_schema();

        let mut parts = Vec::new();
        if self.dir.is_dir() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "parquet") {
                    parts.push(path.to_string_lossy().into_owned());
                }
            }
        }
        parts.sort();

        if parts.is_empty() {
            // first run: an empty table with the right shape
            return Ok(ctx.read_batch(RecordBatch::new_empty(schema))?);
        }

        let mut merged: Option<DataFrame> = None;
        for part in &parts {
            let part_df = ctx
                .read_parquet(part.as_str(), ParquetReadOptions::new().schema(&schema))
                .await?;
            merged = match merged {
                Some(df) => Some(df.union(part_df)?),
                None => Some(part_df),
            };
        }

        merged.ok_or(Error::NoData {
            message: "No history parts found for processing".to_string(),
        })
    }

    async fn append(&self, delta: DataFrame, part_name: &str) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{part_name}.parquet"));
        delta
            .write_parquet(
                &path.to_string_lossy(),
                DataFrameWriteOptions::default().with_single_file_output(true),
                None,
            )
            .await?;
        Ok(())
    }
}
