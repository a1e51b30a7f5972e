use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A catalog entry. `stock` is the number of copies on the shelf and never
/// drops below zero.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub category: String,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Book {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

#[derive(Debug, Clone, Validate)]
pub struct NewBook {
    #[validate(length(min = 1, max = 255, message = "title must be 1-255 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 255, message = "author must be 1-255 characters"))]
    pub author: String,
    #[validate(length(max = 100, message = "category must be at most 100 characters"))]
    pub category: String,
    #[validate(range(min = 0, message = "stock must not be negative"))]
    pub stock: i32,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Validate)]
pub struct BookChanges {
    #[validate(length(min = 1, max = 255, message = "title must be 1-255 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 255, message = "author must be 1-255 characters"))]
    pub author: Option<String>,
    #[validate(length(max = 100, message = "category must be at most 100 characters"))]
    pub category: Option<String>,
    #[validate(range(min = 0, message = "stock must not be negative"))]
    pub stock: Option<i32>,
}

impl BookChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.category.is_none()
            && self.stock.is_none()
    }
}

/// Outcome of an idempotent stock delta.
#[derive(Debug, Clone)]
pub struct StockAdjustment {
    pub book: Book,
    /// The idempotency key had already been applied; nothing changed.
    pub replayed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_book_validation() {
        let book = NewBook {
            title: "Dune".to_string(),
            author: "Herbert".to_string(),
            category: "sf".to_string(),
            stock: 3,
        };
        assert!(book.validate().is_ok());

        let negative = NewBook {
            stock: -1,
            ..book.clone()
        };
        assert!(negative.validate().is_err());

        let untitled = NewBook {
            title: String::new(),
            ..book
        };
        assert!(untitled.validate().is_err());
    }

    #[test]
    fn test_changes_validate_only_present_fields() {
        let changes = BookChanges {
            stock: Some(0),
            ..Default::default()
        };
        assert!(changes.validate().is_ok());
        assert!(!changes.is_empty());
        assert!(BookChanges::default().is_empty());

        let bad = BookChanges {
            stock: Some(-5),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
