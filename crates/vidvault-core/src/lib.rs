pub mod config;
pub mod error;
pub mod types;

pub use error::{VidvaultError, VidvaultResult};
pub use types::{CipherAlgorithm, DigestAlgorithm};
