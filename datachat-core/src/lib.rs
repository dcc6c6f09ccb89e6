pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod http_client;
pub mod key_file;
pub mod model;
pub mod normalizer;
pub mod stream;
#[cfg(test)]
pub mod test_util;
