//! Bearer tokens: signing, renewal over HTTP and lifecycle management.

pub mod client;
pub mod codec;
pub mod manager;

pub use client::{HttpTokenClient, RenewalError, TokenGrant, TokenRenewer};
pub use codec::{Claims, TokenCodec, TokenError};
pub use manager::{RenewalPolicy, TokenManager, TokenRecord};
