//! Built-in processor families.

pub mod database;
pub mod file;
pub mod noop;
pub mod url;

pub use database::DatabaseProcessor;
pub use file::FileProcessor;
pub use noop::NoopProcessor;
pub use url::UrlProcessor;
