use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::PaymentMethod;

/// Reply body the gateway expects from the IPN endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct IpnResponse {
    #[serde(rename = "RspCode")]
    pub rsp_code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

impl IpnResponse {
    pub fn new(rsp_code: &str, message: &str) -> Self {
        Self {
            rsp_code: rsp_code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn invalid_checksum() -> Self {
        Self::new("97", "Invalid checksum")
    }

    pub fn order_not_found() -> Self {
        Self::new("01", "Order not found")
    }

    pub fn already_confirmed() -> Self {
        Self::new("02", "Order already confirmed")
    }

    pub fn invalid_amount() -> Self {
        Self::new("04", "Invalid amount")
    }

    pub fn payment_failed() -> Self {
        Self::new("24", "Transaction was not successful")
    }

    pub fn confirm_success() -> Self {
        Self::new("00", "Confirm success")
    }

    pub fn unknown_error() -> Self {
        Self::new("99", "Unknown error")
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentReturnResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentMethodList {
    pub items: Vec<PaymentMethod>,
}
