pub mod funding;
pub mod journal;
pub mod ledger;
pub mod notifications;
pub mod orders;
pub mod withdrawals;
