pub mod connection;
pub mod types;

pub use connection::PostgresSource;
pub use types::convert_row;
