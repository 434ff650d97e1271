pub mod digest;
pub mod error;
pub mod memo;

pub use digest::{digest, validate, ContentDigest, DigestInput};
pub use error::{Error, Result};
pub use memo::AnchorMemo;
