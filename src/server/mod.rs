mod routes;
mod server;
mod types;

pub use routes::health_check;
pub use server::ApiServer;
pub use types::{ApiError, ApiResponse};
