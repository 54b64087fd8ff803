//! Transaction construction and broadcast

mod broadcast;
mod builder;

pub use broadcast::{Broadcaster, ReceiptStatus, Reconciliation};
pub use builder::{parse_recipient, TransactionBuilder, UnsignedTransaction};

#[cfg(test)]
pub(crate) use builder::test_support;
