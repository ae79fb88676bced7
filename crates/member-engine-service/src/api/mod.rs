//! HTTP 接口层
//!
//! 所有响应体为 camelCase，统一包装为 `{success, code, message, data}`

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{api_routes, build_router};
pub use state::AppState;
