pub mod health;
pub mod jobs;
pub mod static_files;
