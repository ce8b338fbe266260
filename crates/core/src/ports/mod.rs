mod balance_source;
mod block_source;
mod handler;
mod repository;

pub use balance_source::*;
pub use block_source::*;
pub use handler::*;
pub use repository::*;
