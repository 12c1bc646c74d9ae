// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT
use serde::{Deserialize, Serialize};

use vatnest_kernel_core::{CapData, KernelRef, VatId};

/// A message in kernel space: method, arguments, and the promise the
/// sender holds for the outcome (if any).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub method: String,
    pub args: CapData<KernelRef>,
    /// A `kp` reference; `None` for one-way sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<KernelRef>,
}

impl MessageBody {
    pub fn new(method: impl Into<String>, args: CapData<KernelRef>) -> Self {
        Self {
            method: method.into(),
            args,
            result: None,
        }
    }

    pub fn with_result(mut self, result: KernelRef) -> Self {
        self.result = Some(result);
        self
    }
}

/// The garbage-collection notices a vat can receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GcKind {
    /// The kernel has no more strong references to these exports.
    DropExports,
    /// The vat may forget it ever imported these.
    RetireImports,
    /// The owner is gone; importers must forget these exports.
    RetireExports,
}

/// One entry of the persistent run queue.
///
/// Strictly FIFO at the kernel level; sends targeting unresolved promises
/// never appear here, they sit on the promise's own queue until resolution
/// routes them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunQueueItem {
    Send {
        target: KernelRef,
        message: MessageBody,
    },
    Notify {
        vat_id: VatId,
        kpid: KernelRef,
    },
    Gc {
        vat_id: VatId,
        kind: GcKind,
        krefs: Vec<KernelRef>,
    },
    BringOutYourDead {
        vat_id: VatId,
    },
}

impl RunQueueItem {
    /// The references this entry keeps alive while it sits on the queue.
    ///
    /// GC entries are deliberately absent: a retire would never commit if
    /// the notice itself pinned the kref it retires.
    pub fn retained_krefs(&self) -> Vec<KernelRef> {
        match self {
            RunQueueItem::Send { target, message } => {
                let mut krefs = vec![*target];
                krefs.extend(message.args.slots.iter().copied());
                krefs.extend(message.result);
                krefs
            }
            RunQueueItem::Notify { kpid, .. } => vec![*kpid],
            RunQueueItem::Gc { .. } | RunQueueItem::BringOutYourDead { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use vatnest_kernel_core::{CapData, KernelRef, VatId};

    use super::{GcKind, MessageBody, RunQueueItem};

    #[quickcheck]
    fn prop_queue_item_json_roundtrip(item: RunQueueItem) -> bool {
        let json = serde_json::to_string(&item).unwrap();
        let back: RunQueueItem = serde_json::from_str(&json).unwrap();
        back == item
    }

    #[test]
    fn retained_krefs_of_send() {
        let item = RunQueueItem::Send {
            target: KernelRef::Object(1),
            message: MessageBody::new("ping", CapData::single(KernelRef::Object(2)))
                .with_result(KernelRef::Promise(3)),
        };
        assert_eq!(
            item.retained_krefs(),
            vec![
                KernelRef::Object(1),
                KernelRef::Object(2),
                KernelRef::Promise(3)
            ]
        );
    }

    #[test]
    fn gc_entries_retain_nothing() {
        let item = RunQueueItem::Gc {
            vat_id: VatId::new(1),
            kind: GcKind::RetireExports,
            krefs: vec![KernelRef::Object(9)],
        };
        assert!(item.retained_krefs().is_empty());
    }
}
