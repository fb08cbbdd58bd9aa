pub mod build;
pub mod recipe;
pub mod tool;
