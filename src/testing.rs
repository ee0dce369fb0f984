//! Session fixtures shared by the unit tests

use chrono::NaiveDate;

use crate::session::Session;

pub use crate::library::{library_types, Book, Publisher};

pub fn sample_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 9, 14).unwrap()
}

/// In-memory session with the publisher/book schema in place
pub fn library_session() -> Session {
    let session = Session::open_in_memory().unwrap();
    let types = library_types();
    session.register(&types).unwrap();
    session.create_relationships(&types).unwrap();
    session
}
