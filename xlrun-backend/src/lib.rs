pub mod app;
pub mod error;
pub mod handlers;
pub mod state;
pub mod storage;

pub use app::build_router;
