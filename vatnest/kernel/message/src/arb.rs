// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
use quickcheck::{Arbitrary, Gen};

use vatnest_kernel_core::{KernelRef, VatId, VatRef};
use vatnest_testing::arb::{ArbCapData, ArbMethod, ArbVatCapData};

use crate::delivery::VatDelivery;
use crate::queue::{GcKind, MessageBody, RunQueueItem};
use crate::syscall::{Resolution, VatSyscall};

impl Arbitrary for GcKind {
    fn arbitrary(g: &mut Gen) -> Self {
        *g.choose(&[GcKind::DropExports, GcKind::RetireImports, GcKind::RetireExports])
            .expect("slice is non-empty")
    }
}

impl Arbitrary for MessageBody {
    fn arbitrary(g: &mut Gen) -> Self {
        let result = if bool::arbitrary(g) {
            Some(KernelRef::Promise(u64::arbitrary(g) % 1000))
        } else {
            None
        };
        MessageBody {
            method: ArbMethod::arbitrary(g).0,
            args: ArbCapData::arbitrary(g).0,
            result,
        }
    }
}

impl Arbitrary for RunQueueItem {
    fn arbitrary(g: &mut Gen) -> Self {
        match u8::arbitrary(g) % 4 {
            0 => RunQueueItem::Send {
                target: KernelRef::arbitrary(g),
                message: MessageBody::arbitrary(g),
            },
            1 => RunQueueItem::Notify {
                vat_id: VatId::arbitrary(g),
                kpid: KernelRef::Promise(u64::arbitrary(g) % 1000),
            },
            2 => RunQueueItem::Gc {
                vat_id: VatId::arbitrary(g),
                kind: GcKind::arbitrary(g),
                krefs: (0..usize::arbitrary(g) % 4)
                    .map(|_| KernelRef::Object(u64::arbitrary(g) % 1000))
                    .collect(),
            },
            _ => RunQueueItem::BringOutYourDead {
                vat_id: VatId::arbitrary(g),
            },
        }
    }
}

impl Arbitrary for VatDelivery {
    fn arbitrary(g: &mut Gen) -> Self {
        let refs = |g: &mut Gen| {
            (0..usize::arbitrary(g) % 4)
                .map(|_| VatRef::arbitrary(g))
                .collect::<Vec<_>>()
        };
        match u8::arbitrary(g) % 6 {
            0 => VatDelivery::Deliver {
                target: VatRef::arbitrary(g),
                method: ArbMethod::arbitrary(g).0,
                args: ArbVatCapData::arbitrary(g).0,
                result: Option::<bool>::arbitrary(g)
                    .map(|_| VatRef::promise_decided(u64::arbitrary(g) % 1000)),
            },
            1 => VatDelivery::Notify {
                kpid: VatRef::promise_imported(u64::arbitrary(g) % 1000),
                rejected: bool::arbitrary(g),
                value: ArbVatCapData::arbitrary(g).0,
            },
            2 => VatDelivery::DropExports { refs: refs(g) },
            3 => VatDelivery::RetireImports { refs: refs(g) },
            4 => VatDelivery::RetireExports { refs: refs(g) },
            _ => VatDelivery::BringOutYourDead,
        }
    }
}

impl Arbitrary for Resolution {
    fn arbitrary(g: &mut Gen) -> Self {
        Resolution {
            kpid: VatRef::promise_decided(u64::arbitrary(g) % 1000),
            rejected: bool::arbitrary(g),
            value: ArbVatCapData::arbitrary(g).0,
        }
    }
}

impl Arbitrary for VatSyscall {
    fn arbitrary(g: &mut Gen) -> Self {
        let refs = |g: &mut Gen| {
            (0..usize::arbitrary(g) % 4)
                .map(|_| VatRef::arbitrary(g))
                .collect::<Vec<_>>()
        };
        match u8::arbitrary(g) % 10 {
            0 => VatSyscall::Send {
                target: VatRef::arbitrary(g),
                method: ArbMethod::arbitrary(g).0,
                args: ArbVatCapData::arbitrary(g).0,
                result: Option::<bool>::arbitrary(g)
                    .map(|_| VatRef::promise_decided(u64::arbitrary(g) % 1000)),
            },
            1 => VatSyscall::Subscribe {
                kpid: VatRef::promise_imported(u64::arbitrary(g) % 1000),
            },
            2 => VatSyscall::Resolve {
                resolutions: (0..usize::arbitrary(g) % 3)
                    .map(|_| Resolution::arbitrary(g))
                    .collect(),
            },
            3 => VatSyscall::Exit {
                failure: bool::arbitrary(g),
                value: ArbVatCapData::arbitrary(g).0,
            },
            4 => VatSyscall::DropImports { refs: refs(g) },
            5 => VatSyscall::RetireImports { refs: refs(g) },
            6 => VatSyscall::RetireExports { refs: refs(g) },
            7 => VatSyscall::VatstoreGet {
                key: String::arbitrary(g),
            },
            8 => VatSyscall::VatstoreSet {
                key: String::arbitrary(g),
                value: String::arbitrary(g),
            },
            _ => VatSyscall::VatstoreGetNextKey {
                key: String::arbitrary(g),
            },
        }
    }
}
