//! Sample publisher/book model, run by the `demo` command and used in tests
//!
//! A publisher has many books; a book links back to its publisher through a
//! `publisher_id` foreign key.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityType, Link, Shared};
use crate::metadata::{EntityBuilder, FieldType};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Publisher {
    pub id: Option<i64>,
    pub name: String,
    #[serde(skip)]
    pub books: Vec<Shared<Book>>,
}

impl Publisher {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for Publisher {
    const NAME: &'static str = "Publisher";

    fn describe(b: &mut EntityBuilder) {
        b.table("publishers")
            .id("id")
            .column("name", FieldType::Text)
            .one_to_many::<Book>("books");
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    fn refresh_from(&mut self, stored: Self) {
        let books = std::mem::take(&mut self.books);
        *self = stored;
        self.books = books;
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Book {
    pub id: Option<i64>,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub publisher: Link<Publisher>,
}

impl Book {
    pub fn new(title: &str, date: NaiveDate) -> Self {
        Self {
            title: title.to_string(),
            date: Some(date),
            ..Default::default()
        }
    }
}

impl Entity for Book {
    const NAME: &'static str = "Book";

    fn describe(b: &mut EntityBuilder) {
        b.table("books")
            .id("id")
            .column("title", FieldType::Text)
            .column_named("date", "published_at", FieldType::Date)
            .many_to_one::<Publisher>("publisher");
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }
}

/// Every type of the model, in registration order
pub fn library_types() -> Vec<EntityType> {
    vec![EntityType::of::<Publisher>(), EntityType::of::<Book>()]
}
