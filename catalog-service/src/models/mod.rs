//! Domain models for catalog-service.

mod book;

pub use book::{Book, BookChanges, NewBook, StockAdjustment};
