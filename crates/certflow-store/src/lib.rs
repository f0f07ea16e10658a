mod outputs;
mod store;
mod workflows;

pub use store::SqliteStore;
