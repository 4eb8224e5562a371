pub mod run;
pub mod upload;
