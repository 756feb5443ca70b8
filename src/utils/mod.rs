pub mod crypto;
pub mod error;
pub mod logger;
pub mod node_utils;

pub use crypto::CryptoUtils;
pub use error::{Result, RippleError};
pub use logger::setup_logging;
pub use node_utils::NodeUtils;
