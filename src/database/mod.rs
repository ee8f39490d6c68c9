mod connection;
mod pool;
pub mod reader;
mod tables;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

pub const DATABASE_FILENAME: &str = "renter.db";
