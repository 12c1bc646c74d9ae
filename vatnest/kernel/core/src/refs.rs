// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The two reference spaces.
//!
//! Kernel references (`ko<n>`, `kp<n>`) are global to a kernel instance and
//! stable across restarts. Vat references (`o+<n>`, `o-<n>`, `p+<n>`,
//! `p-<n>`) are local to one vat's c-list; the sign encodes which side
//! allocated the number. All of them render to and parse from the sigil
//! strings used in the persistent keyspace and on the worker wire.

use std::fmt;
use std::str::FromStr;

use crate::error::KernelError;

/// Serialize/deserialize a sigil type through its string form.
macro_rules! string_repr_serde {
    ($name:ident, $expecting:literal) => {
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Identifier of a vat within one kernel instance, rendered `v<n>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VatId(u32);

impl VatId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn number(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for VatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for VatId {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('v')
            .ok_or_else(|| KernelError::InvalidRef(s.to_string()))?;
        let n = parse_number(s, digits)?;
        u32::try_from(n)
            .map(Self)
            .map_err(|_| KernelError::InvalidRef(s.to_string()))
    }
}

string_repr_serde!(VatId, "a vat id like 'v3'");

/// Identifier of a subcluster, rendered `s<n>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubclusterId(u32);

impl SubclusterId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn number(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubclusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl FromStr for SubclusterId {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('s')
            .ok_or_else(|| KernelError::InvalidRef(s.to_string()))?;
        let n = parse_number(s, digits)?;
        u32::try_from(n)
            .map(Self)
            .map_err(|_| KernelError::InvalidRef(s.to_string()))
    }
}

string_repr_serde!(SubclusterId, "a subcluster id like 's1'");

/// A kernel-global reference: `ko<n>` for objects, `kp<n>` for promises.
///
/// Device references (`kd<n>`) exist in the identifier grammar but have no
/// kernel support; parsing one is a dedicated error so the caller can tell
/// "malformed" from "unsupported".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KernelRef {
    Object(u64),
    Promise(u64),
}

impl KernelRef {
    pub fn is_promise(&self) -> bool {
        matches!(self, KernelRef::Promise(_))
    }

    pub fn index(&self) -> u64 {
        match self {
            KernelRef::Object(n) | KernelRef::Promise(n) => *n,
        }
    }
}

impl fmt::Display for KernelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelRef::Object(n) => write!(f, "ko{n}"),
            KernelRef::Promise(n) => write!(f, "kp{n}"),
        }
    }
}

impl FromStr for KernelRef {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(digits) = s.strip_prefix("ko") {
            return parse_number(s, digits).map(KernelRef::Object);
        }
        if let Some(digits) = s.strip_prefix("kp") {
            return parse_number(s, digits).map(KernelRef::Promise);
        }
        if s.starts_with("kd") {
            return Err(KernelError::UnsupportedDevice(s.to_string()));
        }
        Err(KernelError::InvalidRef(s.to_string()))
    }
}

string_repr_serde!(KernelRef, "a kernel reference like 'ko1' or 'kp2'");

/// A vat-local reference.
///
/// `o+`/`p+` numbers are allocated by the vat itself (its exports and the
/// promises it decides); `o-`/`p-` numbers are allocated by the kernel when
/// it pushes an import into the vat's c-list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VatRef {
    Object { export: bool, index: u64 },
    Promise { decided: bool, index: u64 },
}

impl VatRef {
    pub fn export(index: u64) -> Self {
        VatRef::Object {
            export: true,
            index,
        }
    }

    pub fn import(index: u64) -> Self {
        VatRef::Object {
            export: false,
            index,
        }
    }

    pub fn promise_decided(index: u64) -> Self {
        VatRef::Promise {
            decided: true,
            index,
        }
    }

    pub fn promise_imported(index: u64) -> Self {
        VatRef::Promise {
            decided: false,
            index,
        }
    }

    pub fn is_promise(&self) -> bool {
        matches!(self, VatRef::Promise { .. })
    }

    /// True when the number was allocated by the vat (`o+` or `p+`).
    pub fn is_vat_allocated(&self) -> bool {
        match self {
            VatRef::Object { export, .. } => *export,
            VatRef::Promise { decided, .. } => *decided,
        }
    }
}

impl fmt::Display for VatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sigil, sign, index) = match self {
            VatRef::Object { export, index } => ('o', if *export { '+' } else { '-' }, index),
            VatRef::Promise { decided, index } => ('p', if *decided { '+' } else { '-' }, index),
        };
        write!(f, "{sigil}{sign}{index}")
    }
}

impl FromStr for VatRef {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let sigil = chars.next();
        let sign = chars.next();
        let digits = chars.as_str();
        let index = parse_number(s, digits)?;
        match (sigil, sign) {
            (Some('o'), Some('+')) => Ok(VatRef::export(index)),
            (Some('o'), Some('-')) => Ok(VatRef::import(index)),
            (Some('p'), Some('+')) => Ok(VatRef::promise_decided(index)),
            (Some('p'), Some('-')) => Ok(VatRef::promise_imported(index)),
            _ => Err(KernelError::InvalidRef(s.to_string())),
        }
    }
}

string_repr_serde!(VatRef, "a vat reference like 'o+0' or 'p-2'");

/// The party allowed to resolve a promise: a vat, or the kernel itself
/// while a result promise is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decider {
    Kernel,
    Vat(VatId),
}

impl fmt::Display for Decider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decider::Kernel => write!(f, "kernel"),
            Decider::Vat(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for Decider {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "kernel" {
            Ok(Decider::Kernel)
        } else {
            s.parse().map(Decider::Vat)
        }
    }
}

string_repr_serde!(Decider, "'kernel' or a vat id");

fn parse_number(whole: &str, digits: &str) -> Result<u64, KernelError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KernelError::InvalidRef(whole.to_string()));
    }
    digits
        .parse()
        .map_err(|_| KernelError::InvalidRef(whole.to_string()))
}

#[cfg(feature = "arb")]
mod arb {
    use quickcheck::{Arbitrary, Gen};

    use super::{KernelRef, SubclusterId, VatId, VatRef};

    impl Arbitrary for VatId {
        fn arbitrary(g: &mut Gen) -> Self {
            VatId::new(u32::arbitrary(g) % 1000)
        }
    }

    impl Arbitrary for SubclusterId {
        fn arbitrary(g: &mut Gen) -> Self {
            SubclusterId::new(u32::arbitrary(g) % 1000)
        }
    }

    impl Arbitrary for KernelRef {
        fn arbitrary(g: &mut Gen) -> Self {
            let n = u64::arbitrary(g) % 10_000;
            if bool::arbitrary(g) {
                KernelRef::Object(n)
            } else {
                KernelRef::Promise(n)
            }
        }
    }

    impl Arbitrary for VatRef {
        fn arbitrary(g: &mut Gen) -> Self {
            let n = u64::arbitrary(g) % 10_000;
            match u8::arbitrary(g) % 4 {
                0 => VatRef::export(n),
                1 => VatRef::import(n),
                2 => VatRef::promise_decided(n),
                _ => VatRef::promise_imported(n),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use quickcheck_macros::quickcheck;

    use super::{Decider, KernelRef, VatId, VatRef};
    use crate::error::KernelError;

    #[test]
    fn render_and_parse() {
        for (s, r) in [
            ("ko0", KernelRef::Object(0)),
            ("ko42", KernelRef::Object(42)),
            ("kp7", KernelRef::Promise(7)),
        ] {
            assert_eq!(s.parse::<KernelRef>().unwrap(), r);
            assert_eq!(r.to_string(), s);
        }
        for (s, r) in [
            ("o+0", VatRef::export(0)),
            ("o-3", VatRef::import(3)),
            ("p+1", VatRef::promise_decided(1)),
            ("p-9", VatRef::promise_imported(9)),
        ] {
            assert_eq!(s.parse::<VatRef>().unwrap(), r);
            assert_eq!(r.to_string(), s);
        }
    }

    #[test]
    fn devices_are_refused() {
        match "kd1".parse::<KernelRef>() {
            Err(KernelError::UnsupportedDevice(s)) => assert_eq!(s, "kd1"),
            other => panic!("expected a device error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_refs() {
        for s in ["", "ko", "ko-1", "kq1", "o1", "o*1", "p+", "v", "ko1x"] {
            assert!(s.parse::<KernelRef>().is_err() || s.parse::<VatRef>().is_err());
        }
        assert!("".parse::<VatId>().is_err());
        assert!("vx".parse::<VatId>().is_err());
    }

    #[test]
    fn decider_forms() {
        assert_eq!("kernel".parse::<Decider>().unwrap(), Decider::Kernel);
        assert_eq!(
            "v12".parse::<Decider>().unwrap(),
            Decider::Vat(VatId::new(12))
        );
    }

    #[quickcheck]
    fn prop_kernel_ref_roundtrip(n: u64, promise: bool) -> bool {
        let r = if promise {
            KernelRef::Promise(n)
        } else {
            KernelRef::Object(n)
        };
        r.to_string().parse::<KernelRef>().unwrap() == r
    }

    #[quickcheck]
    fn prop_vat_ref_roundtrip(n: u64, kind: u8) -> bool {
        let r = match kind % 4 {
            0 => VatRef::export(n),
            1 => VatRef::import(n),
            2 => VatRef::promise_decided(n),
            _ => VatRef::promise_imported(n),
        };
        r.to_string().parse::<VatRef>().unwrap() == r
    }
}
