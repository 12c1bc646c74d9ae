// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! The cross-vat garbage-collection protocol, end to end: drop, the
//! drop-exports notice, the owner's retire, and the retire-imports
//! broadcast.

mod support;

use vatnest_kernel_core::CapData;

use support::TestKernel;

#[tokio::test]
async fn drop_and_retire_walk_the_whole_protocol() {
    let mut tk = TestKernel::new().await;
    let alice = tk.launch("alice", "keeper").await;
    let bob = tk.launch("bob", "keeper").await;

    // Bob makes a thing; Alice holds on to it.
    let made = tk.call(bob.root, "make", CapData::null()).await;
    let thing = tk.fulfilled(made).single_slot().expect("make returns a ref");
    let kept = tk.call(alice.root, "keep", CapData::single(thing)).await;
    tk.fulfilled(kept);

    let objects_before = tk.kernel.get_status().unwrap().object_count;

    // The operator stops caring about the `make` result; from here the
    // thing is alive only through Alice's c-list.
    tk.kernel.forget_promise(made).unwrap();

    // Alice drops her import. Reachability hits zero, so Bob gets a
    // dropExports notice; this keeper replies by retiring the export,
    // which broadcasts retireImports back to Alice.
    let dropped = tk.call(alice.root, "dropKept", CapData::null()).await;
    tk.fulfilled(dropped);
    tk.kernel.run().await.unwrap();

    let bob_log = tk.vat_log(bob.vat_id);
    assert!(
        bob_log.iter().any(|l| l.starts_with("dropExports:o+1")),
        "bob never heard the drop: {bob_log:?}"
    );
    let alice_log = tk.vat_log(alice.vat_id);
    assert!(
        alice_log.iter().any(|l| l.starts_with("retireImports:")),
        "alice never heard the retire: {alice_log:?}"
    );

    // The object record is gone.
    let objects_after = tk.kernel.get_status().unwrap().object_count;
    assert_eq!(objects_after, objects_before - 1);
}

#[tokio::test]
async fn drop_exports_is_emitted_once_until_reexport() {
    let mut tk = TestKernel::new().await;
    let alice = tk.launch("alice", "keeper").await;
    let bob = tk.launch("bob", "keeper").await;

    let made = tk.call(bob.root, "make", CapData::null()).await;
    let thing = tk.fulfilled(made).single_slot().expect("make returns a ref");
    let kept = tk.call(alice.root, "keep", CapData::single(thing)).await;
    tk.fulfilled(kept);
    tk.kernel.forget_promise(made).unwrap();

    let dropped = tk.call(alice.root, "dropKept", CapData::null()).await;
    tk.fulfilled(dropped);
    tk.kernel.run().await.unwrap();

    let drops = tk
        .vat_log(bob.vat_id)
        .iter()
        .filter(|l| l.starts_with("dropExports:"))
        .count();
    assert_eq!(drops, 1);
}

#[tokio::test]
async fn collect_garbage_prompts_every_live_vat() {
    let mut tk = TestKernel::new().await;
    let alice = tk.launch("alice", "keeper").await;
    let bob = tk.launch("bob", "keeper").await;

    tk.kernel.collect_garbage().unwrap();
    tk.kernel.run().await.unwrap();

    for vat in [alice.vat_id, bob.vat_id] {
        assert!(
            tk.vat_log(vat).iter().any(|l| l == "bringOutYourDead"),
            "{vat} was not prompted"
        );
    }
}

#[tokio::test]
async fn termination_retires_the_dead_vats_exports_at_importers() {
    let mut tk = TestKernel::new().await;
    let alice = tk.launch("alice", "keeper").await;
    let bob = tk.launch("bob", "keeper").await;

    let made = tk.call(bob.root, "make", CapData::null()).await;
    let thing = tk.fulfilled(made).single_slot().expect("make returns a ref");
    let kept = tk.call(alice.root, "keep", CapData::single(thing)).await;
    tk.fulfilled(kept);
    tk.kernel.forget_promise(made).unwrap();

    tk.kernel.terminate_vat(bob.vat_id).await.unwrap();
    tk.kernel.run().await.unwrap();

    let alice_log = tk.vat_log(alice.vat_id);
    assert!(
        alice_log.iter().any(|l| l.starts_with("retireImports:")),
        "alice kept a reference to a dead vat's export: {alice_log:?}"
    );
}
