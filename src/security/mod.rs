pub mod certificate;
pub mod token_cache;
pub mod token_issuer;
