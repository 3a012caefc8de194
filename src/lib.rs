pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;
