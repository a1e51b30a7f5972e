//! Catalog service gRPC client for service-to-service communication.

use tonic::Status;
use tonic::transport::Channel;

use super::call_context::CallContext;
use super::proto::catalog::catalog_service_client::CatalogServiceClient;
use super::proto::catalog::{AdjustStockRequest, AdjustStockResponse, BookResponse, GetBookRequest};
use super::retry::{ChannelConfig, connect_lazy, connect_with_retry};

/// Catalog service client. Every call takes the [`CallContext`] of the
/// request it serves so credentials, deadline and request id carry over.
#[derive(Clone)]
pub struct CatalogClient {
    client: CatalogServiceClient<Channel>,
}

impl CatalogClient {
    /// Connect, retrying while the catalog service comes up.
    pub async fn connect(config: &ChannelConfig) -> Result<Self, tonic::transport::Error> {
        let channel = connect_with_retry(config, "catalog-service").await?;
        Ok(Self::from_channel(channel))
    }

    pub fn connect_lazy(config: &ChannelConfig) -> Result<Self, tonic::transport::Error> {
        Ok(Self::from_channel(connect_lazy(config)?))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: CatalogServiceClient::new(channel),
        }
    }

    #[tracing::instrument(skip(self, ctx))]
    pub async fn get_book(&self, ctx: &CallContext, id: &str) -> Result<BookResponse, Status> {
        let request = ctx.outbound(GetBookRequest { id: id.to_string() })?;
        let mut client = self.client.clone();
        let response = ctx.deadline.run(client.get_book(request)).await?;
        Ok(response.into_inner())
    }

    /// Apply `delta` to the book's stock. The catalog refuses a result below
    /// zero with `FAILED_PRECONDITION` and does not re-apply a known key.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn adjust_stock(
        &self,
        ctx: &CallContext,
        book_id: &str,
        delta: i32,
        idempotency_key: &str,
    ) -> Result<AdjustStockResponse, Status> {
        let request = ctx.outbound(AdjustStockRequest {
            book_id: book_id.to_string(),
            delta,
            idempotency_key: idempotency_key.to_string(),
        })?;
        let mut client = self.client.clone();
        let response = ctx.deadline.run(client.adjust_stock(request)).await?;
        Ok(response.into_inner())
    }
}
