pub mod client;
pub mod intent;

pub use client::{Bank, ChargeVerification, GatewayClient, GatewayError, InitializedCharge};
pub use intent::{ChargeIntent, OrderIntent};
