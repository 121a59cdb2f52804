//! Built-in providers.
//!
//! Each provider implements [`Provider`](crate::Provider) for the kinds it
//! understands and refuses everything else with
//! [`ProviderError::Unsupported`](crate::ProviderError::Unsupported).

mod file;
mod http;
mod log;
mod process;

pub use file::FileProvider;
pub use http::HttpFetchProvider;
pub use log::LogProvider;
pub use process::ProcessProvider;
