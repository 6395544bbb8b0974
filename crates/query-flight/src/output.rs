//! Collected query results

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::FlightData;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use tonic::Status;

/// Tabular result of one query: column schema, row batches and totals
#[derive(Debug, Clone)]
pub struct QueryOutput {
    /// Column names and types
    pub schema: SchemaRef,
    /// Result rows
    pub batches: Vec<RecordBatch>,
    /// Total number of rows across all batches
    pub total_rows: usize,
    /// Arrow in-memory size of all batches, in bytes
    pub total_bytes: usize,
}

impl QueryOutput {
    /// Wrap batches, computing the row and byte totals
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        let total_rows = batches.iter().map(|b| b.num_rows()).sum();
        let total_bytes = batches.iter().map(|b| b.get_array_memory_size()).sum();
        Self {
            schema,
            batches,
            total_rows,
            total_bytes,
        }
    }

    /// Number of result columns
    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    /// Encode as a Flight `DoGet` response stream
    ///
    /// The schema message is always sent first, so a client can still learn
    /// the columns of a query that returned no rows.
    pub fn into_flight_stream(self) -> BoxStream<'static, Result<FlightData, Status>> {
        FlightDataEncoderBuilder::new()
            .with_schema(self.schema)
            .build(stream::iter(self.batches.into_iter().map(Ok)))
            .map_err(|e| Status::internal(e.to_string()))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn create_test_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]));

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_totals() {
        let batch = create_test_batch();
        let output = QueryOutput::new(batch.schema(), vec![batch.clone(), batch]);
        assert_eq!(output.total_rows, 6);
        assert_eq!(output.num_columns(), 2);
        assert!(output.total_bytes > 0);
    }

    #[tokio::test]
    async fn test_flight_stream_carries_schema_without_rows() {
        let batch = create_test_batch();
        let output = QueryOutput::new(batch.schema(), Vec::new());

        let messages: Vec<FlightData> = output.into_flight_stream().try_collect().await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}
