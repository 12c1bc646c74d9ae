// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Golden tests for the persisted and wire shapes.
//!
//! The run queue and the vat c-lists survive kernel restarts, so the JSON
//! of these types is a compatibility surface: changing it silently would
//! strand existing stores. Golden files live under `golden/` next to this
//! test; if one doesn't exist it is created from the current encoder.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Path to a golden file.
fn path(prefix: &str, name: &str, ext: &str) -> String {
    let path = Path::new("golden").join(prefix).join(name);
    format!("{}.{}", path.display(), ext)
}

/// Read the contents of an existing golden file, or create it by turning
/// `fallback` into a string first.
fn read_or_create<T>(
    prefix: &str,
    name: &str,
    ext: &str,
    fallback: &T,
    to_string: fn(&T) -> String,
) -> String {
    let p = path(prefix, name, ext);
    let p = Path::new(&p);

    if !p.exists() {
        if let Some(p) = p.parent() {
            std::fs::create_dir_all(p).expect("failed to create golden directory");
        }
        let s = to_string(fallback);
        let mut f = File::create(p)
            .unwrap_or_else(|e| panic!("Cannot create golden file at {:?}: {}", p, e));
        f.write_all(s.as_bytes()).unwrap();
    }

    let mut f =
        File::open(p).unwrap_or_else(|e| panic!("Cannot open golden file at {:?}: {}", p, e));

    let mut s = String::new();
    f.read_to_string(&mut s).expect("Cannot read golden file.");
    s
}

/// Check that a golden file created earlier can still be parsed by the
/// current model, and that re-encoding produces the same JSON.
fn test_json<T: Serialize + DeserializeOwned + Debug + PartialEq>(
    prefix: &str,
    name: &str,
    data: &T,
) {
    let to_json = |d: &T| serde_json::to_string_pretty(d).expect("failed to serialize");

    let json = read_or_create(prefix, name, "json", data, to_json);

    let parsed: T = serde_json::from_str(&json)
        .unwrap_or_else(|e| panic!("Cannot deserialize {}/{}.json: {}", prefix, name, e));

    assert_eq!(&parsed, data, "decoded golden differs from the model");
    assert_eq!(to_json(&parsed), json.trim_end(), "re-encoding changed");
}

macro_rules! golden_json {
    ($prefix:literal, $name:ident, $value:expr) => {
        #[test]
        fn $name() {
            let label = stringify!($name);
            let data = $value;
            crate::test_json($prefix, label, &data);
        }
    };
}

mod queue {
    use vatnest_kernel_core::{CapData, KernelRef, VatId};
    use vatnest_kernel_message::queue::{GcKind, MessageBody, RunQueueItem};

    golden_json! { "queue", send, RunQueueItem::Send {
        target: KernelRef::Object(1),
        message: MessageBody::new("makeCounter", CapData::single(KernelRef::Object(4)))
            .with_result(KernelRef::Promise(7)),
    }}

    golden_json! { "queue", notify, RunQueueItem::Notify {
        vat_id: VatId::new(2),
        kpid: KernelRef::Promise(7),
    }}

    golden_json! { "queue", gc_drop, RunQueueItem::Gc {
        vat_id: VatId::new(1),
        kind: GcKind::DropExports,
        krefs: vec![KernelRef::Object(4), KernelRef::Object(9)],
    }}

    golden_json! { "queue", bring_out_your_dead, RunQueueItem::BringOutYourDead {
        vat_id: VatId::new(3),
    }}
}

mod delivery {
    use vatnest_kernel_core::{CapData, MarshalledError, VatRef};
    use vatnest_kernel_message::delivery::{DeliveryStatus, VatDelivery};

    golden_json! { "delivery", deliver, VatDelivery::Deliver {
        target: VatRef::export(0),
        method: "ping".to_string(),
        args: CapData::null(),
        result: Some(VatRef::promise_imported(1)),
    }}

    golden_json! { "delivery", notify_rejected, VatDelivery::Notify {
        kpid: VatRef::promise_imported(1),
        rejected: true,
        value: MarshalledError::new("vat terminated").to_capdata(),
    }}

    golden_json! { "delivery", status_error, DeliveryStatus::Error {
        error: MarshalledError::new("boom").to_capdata(),
    }}
}

mod syscall {
    use vatnest_kernel_core::{CapData, VatRef};
    use vatnest_kernel_message::syscall::{Resolution, SyscallResult, VatSyscall};

    golden_json! { "syscall", send, VatSyscall::Send {
        target: VatRef::import(2),
        method: "inc".to_string(),
        args: CapData::null(),
        result: Some(VatRef::promise_decided(5)),
    }}

    golden_json! { "syscall", resolve, VatSyscall::Resolve {
        resolutions: vec![Resolution {
            kpid: VatRef::promise_decided(5),
            rejected: false,
            value: CapData::text("hi"),
        }],
    }}

    golden_json! { "syscall", vatstore_get_result, SyscallResult::Value {
        value: Some("counter=3".to_string()),
    }}
}
