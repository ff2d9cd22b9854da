use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::pool::Sink;
use crate::record::Document;
use crate::store::RecordWriter;

/// Routes finished records to the success output and exhausted ones to the
/// failure output.
#[derive(Debug)]
pub struct DatasetSink {
    success: RecordWriter,
    failure: RecordWriter,
}

impl DatasetSink {
    pub fn new(success: RecordWriter, failure: RecordWriter) -> Self {
        Self { success, failure }
    }
}

#[async_trait]
impl Sink<Document> for DatasetSink {
    async fn succeeded(&mut self, item: Document) -> Result<()> {
        self.success.write(&item).await
    }

    async fn exhausted(&mut self, item: Document) -> Result<()> {
        self.failure.write(&item).await
    }

    async fn close(&mut self) -> Result<()> {
        let success = self.success.close().await;
        let failure = self.failure.close().await;
        success.and(failure)
    }
}
