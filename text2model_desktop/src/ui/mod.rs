pub mod app;
pub mod gallery;
pub mod settings;
