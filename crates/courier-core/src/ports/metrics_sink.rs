use async_trait::async_trait;

use crate::app::status::MetricsReport;
use crate::error::Result;

/// Destination of the periodic metrics push.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn push(&self, report: &MetricsReport) -> Result<()>;
}
