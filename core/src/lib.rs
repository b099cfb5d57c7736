pub mod catalog_import;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod shopping_list;
pub mod validate;
