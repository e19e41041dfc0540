pub mod absence;
pub mod builder;
pub mod directory;
pub mod error;
pub mod policy;
pub mod service;
pub mod store;
pub mod timeline;
pub mod utils;
