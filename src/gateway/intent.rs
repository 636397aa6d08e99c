//! Typed metadata carried through the gateway. A charge is initialized with a
//! `ChargeIntent` attached; when the gateway reports the charge back (verify
//! response or webhook payload) the intent is deserialized and validated
//! before anything is written locally.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::DeliveryAddress;
use crate::error::AppError;
use crate::money;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChargeIntent {
    /// Wallet top-up for an existing account.
    Funding { account_id: Uuid, amount: BigDecimal },
    /// Full order intent; the order row is only materialized once the charge
    /// succeeds, so abandoned checkouts leave nothing behind.
    Order(OrderIntent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderIntent {
    pub buyer_id: Uuid,
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub commission_amount: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub delivery_address: DeliveryAddress,
}

impl OrderIntent {
    /// The amount the buyer is charged at the gateway.
    pub fn charge_amount(&self) -> BigDecimal {
        &self.total_amount + &self.delivery_fee
    }

    /// Validate an intent that came back over the wire. Metadata riding
    /// through the gateway is untrusted input on the way in.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.quantity < 1 {
            return Err(AppError::Validation("order quantity must be at least 1".into()));
        }
        money::require_positive(&self.unit_price, "unit price")?;
        money::require_positive(&self.total_amount, "total amount")?;
        if self.commission_amount < BigDecimal::from(0) {
            return Err(AppError::Validation("commission must not be negative".into()));
        }
        if self.delivery_fee < BigDecimal::from(0) {
            return Err(AppError::Validation("delivery fee must not be negative".into()));
        }
        if self.commission_amount > self.total_amount {
            return Err(AppError::Validation("commission exceeds order total".into()));
        }
        let expected_total = &self.unit_price * BigDecimal::from(self.quantity);
        if self.total_amount != expected_total {
            return Err(AppError::Validation(format!(
                "order total {} does not match price x quantity {}",
                self.total_amount, expected_total
            )));
        }
        if self.delivery_address.address.trim().is_empty() {
            return Err(AppError::Validation("missing delivery address".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn address() -> DeliveryAddress {
        DeliveryAddress {
            name: "A. Buyer".to_string(),
            address: "1 Market Road".to_string(),
            phone_number: "0800000000".to_string(),
            city: "Lagos".to_string(),
            state: "Lagos".to_string(),
        }
    }

    fn intent() -> OrderIntent {
        OrderIntent {
            buyer_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity: 3,
            unit_price: dec("1000"),
            total_amount: dec("3000"),
            commission_amount: dec("150.00"),
            delivery_fee: dec("200"),
            delivery_address: address(),
        }
    }

    #[test]
    fn test_valid_intent_passes() {
        assert!(intent().validate().is_ok());
        assert_eq!(intent().charge_amount(), dec("3200"));
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let mut bad = intent();
        bad.total_amount = dec("2999");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_missing_address_rejected() {
        let mut bad = intent();
        bad.delivery_address.address = "  ".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_intent_round_trips_as_tagged_json() {
        let original = ChargeIntent::Order(intent());
        let json = serde_json::to_value(&original).unwrap();
        assert_eq!(json["kind"], "order");

        let back: ChargeIntent = serde_json::from_value(json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_funding_intent_tag() {
        let original = ChargeIntent::Funding {
            account_id: Uuid::new_v4(),
            amount: dec("500"),
        };
        let json = serde_json::to_value(&original).unwrap();
        assert_eq!(json["kind"], "funding");
        let back: ChargeIntent = serde_json::from_value(json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let json = serde_json::json!({"kind": "mystery", "amount": "1"});
        assert!(serde_json::from_value::<ChargeIntent>(json).is_err());
    }
}
