// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Serialized capability data.
//!
//! A `CapData` is an application payload the kernel does not interpret,
//! plus the array of references extracted from it. Inside the JSON body a
//! reference appears as `{"#ref": <index>}`, an index into `slots`. The
//! kernel's only contact with the body is verifying that the embedded
//! indices and the slot array agree; everything else is vat business.
//!
//! The type is generic over the slot space: `CapData<KernelRef>` inside
//! the kernel and its queues, `CapData<VatRef>` on the worker wire. The
//! translator moves between the two with [`CapData::map_slots`].

use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Marker key identifying a slot reference inside a body.
const REF_KEY: &str = "#ref";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapData<S> {
    pub body: String,
    pub slots: Vec<S>,
}

impl<S> CapData<S> {
    pub fn new(body: impl Into<String>, slots: Vec<S>) -> Self {
        Self {
            body: body.into(),
            slots,
        }
    }

    /// The JSON `null` payload with no references.
    pub fn null() -> Self {
        Self::new("null", Vec::new())
    }

    /// A plain string payload with no references.
    pub fn text(s: &str) -> Self {
        Self::new(
            serde_json::to_string(s).expect("strings always serialize"),
            Vec::new(),
        )
    }

    /// A payload that is exactly one reference.
    pub fn single(slot: S) -> Self {
        Self::new(format!("{{\"{REF_KEY}\":0}}"), vec![slot])
    }

    /// Translate the slot array into another reference space, preserving
    /// the body untouched. Duplicate slots are translated independently;
    /// the caller's mapping is expected to be memoised per translation
    /// pass so duplicates share one allocation.
    pub fn map_slots<T, E>(self, mut f: impl FnMut(S) -> Result<T, E>) -> Result<CapData<T>, E> {
        let mut slots = Vec::with_capacity(self.slots.len());
        for s in self.slots {
            slots.push(f(s)?);
        }
        Ok(CapData {
            body: self.body,
            slots,
        })
    }

    /// Check that the body is JSON and its `{"#ref": i}` markers match the
    /// slot array: every index in bounds, every slot referenced.
    pub fn verify(&self) -> Result<(), KernelError> {
        let value: serde_json::Value = serde_json::from_str(&self.body)
            .map_err(|e| KernelError::InvalidCapData(format!("body is not JSON: {e}")))?;
        let mut seen = vec![false; self.slots.len()];
        collect_refs(&value, &mut |ix| {
            if ix >= self.slots.len() {
                return Err(KernelError::InvalidCapData(format!(
                    "body references slot {ix} but only {} slots are present",
                    self.slots.len()
                )));
            }
            seen[ix] = true;
            Ok(())
        })?;
        if let Some(unused) = seen.iter().position(|s| !s) {
            return Err(KernelError::InvalidCapData(format!(
                "slot {unused} is never referenced by the body"
            )));
        }
        Ok(())
    }
}

impl<S: Clone> CapData<S> {
    /// The single slot of a payload shaped like [`CapData::single`].
    pub fn single_slot(&self) -> Option<S> {
        if self.slots.len() == 1 {
            self.slots.first().cloned()
        } else {
            None
        }
    }
}

fn collect_refs(
    value: &serde_json::Value,
    f: &mut impl FnMut(usize) -> Result<(), KernelError>,
) -> Result<(), KernelError> {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_refs(item, f)?;
            }
        }
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(ix) = map.get(REF_KEY) {
                    let ix = ix.as_u64().ok_or_else(|| {
                        KernelError::InvalidCapData(format!("non-numeric slot index: {ix}"))
                    })?;
                    return f(ix as usize);
                }
            }
            for v in map.values() {
                collect_refs(v, f)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::CapData;
    use crate::refs::KernelRef;

    #[test]
    fn verify_matching_slots() {
        let cd = CapData::new(
            r##"{"root":{"#ref":0},"extra":[{"#ref":1},{"#ref":0}]}"##,
            vec![KernelRef::Object(1), KernelRef::Object(2)],
        );
        cd.verify().unwrap();
    }

    #[test]
    fn verify_rejects_out_of_bounds() {
        let cd = CapData::new(r##"{"#ref":1}"##, vec![KernelRef::Object(1)]);
        assert!(cd.verify().is_err());
    }

    #[test]
    fn verify_rejects_unreferenced_slot() {
        let cd = CapData::new("null", vec![KernelRef::Object(1)]);
        assert!(cd.verify().is_err());
    }

    #[test]
    fn verify_rejects_non_json() {
        let cd: CapData<KernelRef> = CapData::new("not json", vec![]);
        assert!(cd.verify().is_err());
    }

    #[test]
    fn helpers_verify() {
        CapData::<KernelRef>::null().verify().unwrap();
        CapData::<KernelRef>::text("hi").verify().unwrap();
        CapData::single(KernelRef::Promise(3)).verify().unwrap();
        assert_eq!(CapData::<KernelRef>::text("hi").body, "\"hi\"");
    }

    #[test]
    fn map_slots_keeps_body() {
        let cd = CapData::single(KernelRef::Object(7));
        let mapped = cd
            .clone()
            .map_slots(|s| Ok::<_, ()>(s.to_string()))
            .unwrap();
        assert_eq!(mapped.body, cd.body);
        assert_eq!(mapped.slots, vec!["ko7".to_string()]);
    }
}
