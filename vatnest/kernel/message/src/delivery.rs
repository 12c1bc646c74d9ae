// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Frames the kernel sends into a worker, in the receiving vat's local
//! reference space. These are the wire shapes of §external-interfaces;
//! the in-process transport moves them as values, a remote transport
//! serializes them as JSON.

use serde::{Deserialize, Serialize};

use vatnest_kernel_core::{CapData, VatRef};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VatDelivery {
    /// Deliver a message to one of the vat's exports, or pipelined to a
    /// promise the vat decides.
    Deliver {
        target: VatRef,
        method: String,
        args: CapData<VatRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<VatRef>,
    },
    /// A promise the vat subscribed to has settled.
    Notify {
        kpid: VatRef,
        rejected: bool,
        value: CapData<VatRef>,
    },
    /// The kernel holds no more strong references to these exports.
    DropExports { refs: Vec<VatRef> },
    /// These imports will never be mentioned again.
    RetireImports { refs: Vec<VatRef> },
    /// These exports will never be mentioned again.
    RetireExports { refs: Vec<VatRef> },
    /// Prompt the vat to publish its pending drops and retires.
    BringOutYourDead,
}

/// The worker's terminal reply to one delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DeliveryStatus {
    Ok,
    /// The delivery raised; the payload is the marshalled error.
    Error { error: CapData<VatRef> },
}

impl DeliveryStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DeliveryStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::VatDelivery;

    #[quickcheck]
    fn prop_delivery_json_roundtrip(delivery: VatDelivery) -> bool {
        let json = serde_json::to_string(&delivery).unwrap();
        let back: VatDelivery = serde_json::from_str(&json).unwrap();
        back == delivery
    }
}
