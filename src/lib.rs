pub mod config;
pub mod errors;
pub mod manager;
pub mod scraper;
pub mod storage;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_support;
