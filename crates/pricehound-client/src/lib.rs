pub mod http;

#[cfg(feature = "browser")]
pub mod chrome;

pub use http::{HttpLauncher, StaticPage};

#[cfg(feature = "browser")]
pub use chrome::{ChromeLauncher, ChromePage};
