pub mod cache;
pub mod database;
pub mod error;
pub mod repo;
pub mod schema;

pub use cache::BadgeStore;
pub use database::Database;
pub use error::StoreError;
pub use repo::BadgeRepo;
