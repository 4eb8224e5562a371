pub mod archive;
pub mod delete;
pub mod download;
pub mod logs;
pub mod results;
pub mod status;
