//! CatalogService gRPC implementation.

use crate::grpc::access;
use crate::grpc::proto::{
    catalog_service_server::CatalogService as CatalogRpc, AdjustStockRequest,
    AdjustStockResponse, BookResponse, ComponentStatus, CreateBookRequest, GetBookRequest,
    HealthCheckRequest, HealthCheckResponse, ListBooksRequest, ListBooksResponse,
    RecommendRequest, UpdateBookRequest,
};
use crate::models::{Book, BookChanges, NewBook};
use crate::services::metrics::{GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};
use crate::services::{CatalogError, CatalogService};
use prost_types::Timestamp;
use service_core::error::AppError;
use service_core::grpc::{AuthGate, HealthReport, HealthReporter, IntoStatus};
use tonic::{Request, Response, Status};
use tracing::instrument;

pub struct CatalogServiceImpl {
    catalog: CatalogService,
    gate: AuthGate,
    health_reporter: Option<HealthReporter>,
}

impl CatalogServiceImpl {
    pub fn new(catalog: CatalogService, gate: AuthGate) -> Self {
        Self {
            catalog,
            gate,
            health_reporter: None,
        }
    }

    pub fn with_health_reporter(mut self, reporter: HealthReporter) -> Self {
        self.health_reporter = Some(reporter);
        self
    }

    fn book_to_proto(book: &Book) -> BookResponse {
        BookResponse {
            id: book.id.to_string(),
            title: book.title.clone(),
            author: book.author.clone(),
            category: book.category.clone(),
            stock: book.stock,
            created_at: Some(Timestamp {
                seconds: book.created_at.timestamp(),
                nanos: book.created_at.timestamp_subsec_nanos() as i32,
            }),
            updated_at: Some(Timestamp {
                seconds: book.updated_at.timestamp(),
                nanos: book.updated_at.timestamp_subsec_nanos() as i32,
            }),
        }
    }

    fn books_to_proto(books: Vec<Book>) -> ListBooksResponse {
        ListBooksResponse {
            books: books.iter().map(Self::book_to_proto).collect(),
        }
    }

    fn health_to_proto(report: &HealthReport) -> HealthCheckResponse {
        HealthCheckResponse {
            status: report.status().to_string(),
            components: report
                .components
                .iter()
                .map(|c| ComponentStatus {
                    name: c.name.clone(),
                    status: c.status().to_string(),
                    message: c.message.clone(),
                })
                .collect(),
        }
    }
}

fn finish<T>(method: &str, result: Result<T, CatalogError>) -> Result<Response<T>, Status> {
    match result {
        Ok(value) => {
            GRPC_REQUESTS_TOTAL
                .with_label_values(&[method, "ok"])
                .inc();
            Ok(Response::new(value))
        }
        Err(e) => {
            let status = AppError::from(e).into_status();
            GRPC_REQUESTS_TOTAL
                .with_label_values(&[method, &format!("{:?}", status.code())])
                .inc();
            Err(status)
        }
    }
}

#[tonic::async_trait]
impl CatalogRpc for CatalogServiceImpl {
    #[instrument(
        skip(self, request),
        fields(service = "catalog-service", method = "Create")
    )]
    async fn create(
        &self,
        request: Request<CreateBookRequest>,
    ) -> Result<Response<BookResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Create"])
            .start_timer();
        self.gate.authorize(access::CREATE, &request).await?;

        let req = request.into_inner();
        let result = self
            .catalog
            .create(NewBook {
                title: req.title,
                author: req.author,
                category: req.category,
                stock: req.stock,
            })
            .await
            .map(|book| Self::book_to_proto(&book));

        finish("Create", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "catalog-service", method = "GetBook")
    )]
    async fn get_book(
        &self,
        request: Request<GetBookRequest>,
    ) -> Result<Response<BookResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["GetBook"])
            .start_timer();
        self.gate.authorize(access::GET_BOOK, &request).await?;

        let id = request.into_inner().id;
        let result = self
            .catalog
            .get(&id)
            .await
            .map(|book| Self::book_to_proto(&book));

        finish("GetBook", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "catalog-service", method = "ListBooks")
    )]
    async fn list_books(
        &self,
        request: Request<ListBooksRequest>,
    ) -> Result<Response<ListBooksResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["ListBooks"])
            .start_timer();
        self.gate.authorize(access::LIST_BOOKS, &request).await?;

        let result = self.catalog.list().await.map(Self::books_to_proto);
        finish("ListBooks", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "catalog-service", method = "Recommend")
    )]
    async fn recommend(
        &self,
        request: Request<RecommendRequest>,
    ) -> Result<Response<ListBooksResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["Recommend"])
            .start_timer();
        self.gate.authorize(access::RECOMMEND, &request).await?;

        let limit = request.into_inner().limit;
        let result = self
            .catalog
            .recommend(limit)
            .await
            .map(Self::books_to_proto);
        finish("Recommend", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "catalog-service", method = "UpdateBook")
    )]
    async fn update_book(
        &self,
        request: Request<UpdateBookRequest>,
    ) -> Result<Response<BookResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["UpdateBook"])
            .start_timer();
        self.gate.authorize(access::UPDATE_BOOK, &request).await?;

        let req = request.into_inner();
        let result = self
            .catalog
            .update(
                &req.id,
                BookChanges {
                    title: req.title,
                    author: req.author,
                    category: req.category,
                    stock: req.stock,
                },
            )
            .await
            .map(|book| Self::book_to_proto(&book));

        finish("UpdateBook", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "catalog-service", method = "AdjustStock")
    )]
    async fn adjust_stock(
        &self,
        request: Request<AdjustStockRequest>,
    ) -> Result<Response<AdjustStockResponse>, Status> {
        let _timer = GRPC_REQUEST_DURATION
            .with_label_values(&["AdjustStock"])
            .start_timer();
        let identity = self.gate.authorize(access::ADJUST_STOCK, &request).await?;

        let req = request.into_inner();
        tracing::debug!(
            caller = %identity.subject_id,
            book_id = %req.book_id,
            delta = req.delta,
            "Adjusting stock"
        );
        let result = self
            .catalog
            .adjust_stock(&req.book_id, req.delta, &req.idempotency_key)
            .await
            .map(|adjustment| AdjustStockResponse {
                book: Some(Self::book_to_proto(&adjustment.book)),
                replayed: adjustment.replayed,
            });

        finish("AdjustStock", result)
    }

    #[instrument(
        skip(self, request),
        fields(service = "catalog-service", method = "Health")
    )]
    async fn health(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        self.gate.check(access::HEALTH, &request).await?;

        let report = self.catalog.health().await;
        if let Some(reporter) = &self.health_reporter {
            reporter.publish(&report).await;
        }

        finish("Health", Ok(Self::health_to_proto(&report)))
    }
}
