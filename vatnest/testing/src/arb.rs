// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
use quickcheck::{Arbitrary, Gen};

use vatnest_kernel_core::{CapData, KernelRef, VatRef};

/// A well-formed `CapData<KernelRef>`: the body is JSON and references
/// exactly the slots in the array, so `CapData::verify` accepts it.
#[derive(Clone, Debug)]
pub struct ArbCapData(pub CapData<KernelRef>);

impl Arbitrary for ArbCapData {
    fn arbitrary(g: &mut Gen) -> Self {
        let slots: Vec<KernelRef> = (0..usize::arbitrary(g) % 4)
            .map(|_| KernelRef::arbitrary(g))
            .collect();
        ArbCapData(capdata_over(g, slots))
    }
}

/// Like [`ArbCapData`] but in the vat-local reference space.
#[derive(Clone, Debug)]
pub struct ArbVatCapData(pub CapData<VatRef>);

impl Arbitrary for ArbVatCapData {
    fn arbitrary(g: &mut Gen) -> Self {
        let slots: Vec<VatRef> = (0..usize::arbitrary(g) % 4)
            .map(|_| VatRef::arbitrary(g))
            .collect();
        ArbVatCapData(capdata_over(g, slots))
    }
}

/// A plausible method name: non-empty, ASCII alphanumeric, starts with a letter.
#[derive(Clone, Debug)]
pub struct ArbMethod(pub String);

impl Arbitrary for ArbMethod {
    fn arbitrary(g: &mut Gen) -> Self {
        let letters = "abcdefghijklmnopqrstuvwxyz";
        let first = letters
            .chars()
            .nth(usize::arbitrary(g) % letters.len())
            .expect("index in range");
        let len = usize::arbitrary(g) % 12;
        let rest: String = (0..len)
            .map(|_| {
                let pool = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
                pool.chars()
                    .nth(usize::arbitrary(g) % pool.len())
                    .expect("index in range")
            })
            .collect();
        ArbMethod(format!("{first}{rest}"))
    }
}

/// Build a body that references each slot exactly once, wrapped in enough
/// incidental structure to exercise the body walker.
fn capdata_over<S>(g: &mut Gen, slots: Vec<S>) -> CapData<S> {
    let refs: Vec<serde_json::Value> = (0..slots.len())
        .map(|ix| serde_json::json!({ "#ref": ix }))
        .collect();
    let body = serde_json::json!({
        "args": refs,
        "tag": u8::arbitrary(g),
    });
    CapData::new(
        serde_json::to_string(&body).expect("body always serializes"),
        slots,
    )
}
