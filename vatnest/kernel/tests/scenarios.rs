// Copyright 2025-2026 Vatnest Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! End-to-end scenarios driving the kernel through the public operator
//! surface with scripted vats.

mod support;

use vatnest_kernel_config::{BundleSpec, ClusterConfig, VatConfig};
use vatnest_kernel_core::{CapData, ErrorCode, KernelError, KernelRef, VatId};

use support::TestKernel;

#[tokio::test]
async fn hello_world() {
    let mut tk = TestKernel::new().await;
    let vat = tk.launch("alice", "greeter").await;

    let result = tk.call(vat.root, "ping", CapData::null()).await;

    let value = tk.fulfilled(result);
    assert_eq!(value.body, "\"hi\"");
    assert!(value.slots.is_empty());
}

#[tokio::test]
async fn promise_pipelining_preserves_order() {
    let mut tk = TestKernel::new().await;
    let alice = tk.launch("alice", "driver").await;
    let bob = tk.launch("bob", "counter").await;

    let result = tk
        .call(alice.root, "go", CapData::single(bob.root))
        .await;
    assert_eq!(tk.fulfilled(result).body, "\"sent\"");

    // Bob saw the maker first, then both incs, in send order, even though
    // the incs were sent before the counter existed.
    assert_eq!(tk.vat_log(bob.vat_id), vec!["makeCounter", "inc", "inc"]);
    assert_eq!(tk.vatstore(bob.vat_id, "count").as_deref(), Some("2"));

    // The driver heard about all three promises, incs in order.
    let log = tk.vat_log(alice.vat_id);
    let notifies: Vec<&String> = log.iter().filter(|l| l.starts_with("notify:")).collect();
    assert_eq!(notifies.len(), 3);
    assert!(notifies[1].ends_with("\"1\""));
    assert!(notifies[2].ends_with("\"2\""));
}

#[tokio::test]
async fn third_party_handoff_survives_middleman_termination() {
    let mut tk = TestKernel::new().await;
    let bob = tk.launch("bob", "keeper").await;
    let carol = tk.launch("carol", "keeper").await;

    // Introduce Carol to Bob, then ask Bob for her back.
    let kept = tk
        .call(bob.root, "keep", CapData::single(carol.root))
        .await;
    tk.fulfilled(kept);
    let got = tk.call(bob.root, "getKept", CapData::null()).await;
    let value = tk.fulfilled(got);
    assert_eq!(value.slots, vec![carol.root]);

    // Bob goes away; the direct reference to Carol still works.
    tk.kernel.terminate_vat(bob.vat_id).await.unwrap();
    tk.kernel.run().await.unwrap();

    let ping = tk.call(carol.root, "ping", CapData::null()).await;
    assert_eq!(tk.fulfilled(ping).body, "\"pong\"");
}

#[tokio::test]
async fn vat_restarts_after_fault_and_rejects_the_delivery() {
    let mut tk = TestKernel::new().await;
    let vat = tk.launch("alice", "keeper").await;

    // Keeper throws on unknown methods.
    let boom = tk.call(vat.root, "boom", CapData::null()).await;
    let error = tk.rejected(boom);
    assert_eq!(error.message, "vat fault");
    assert!(error
        .cause
        .as_ref()
        .is_some_and(|c| c.message.contains("unknown method")));

    // Paused during the fault, back to running afterwards.
    let status = tk.kernel.get_status().unwrap();
    let entry = status
        .vats
        .iter()
        .find(|v| v.vat_id == vat.vat_id)
        .unwrap();
    assert_eq!(entry.state, "running");

    // The next delivery proceeds normally.
    let ping = tk.call(vat.root, "ping", CapData::null()).await;
    assert_eq!(tk.fulfilled(ping).body, "\"pong\"");
}

#[tokio::test]
async fn exit_terminates_the_vat_after_the_crank() {
    let mut tk = TestKernel::new().await;
    let vat = tk.launch("alice", "exiter").await;

    let result = tk.call(vat.root, "leave", CapData::null()).await;
    assert_eq!(tk.fulfilled(result).body, "\"bye\"");

    let status = tk.kernel.get_status().unwrap();
    let entry = status
        .vats
        .iter()
        .find(|v| v.vat_id == vat.vat_id)
        .unwrap();
    assert_eq!(entry.state, "terminated");

    // The root was reclaimed with the vat; the kernel no longer knows it.
    let err = tk
        .kernel
        .queue_message(vat.root, "leave", CapData::null())
        .unwrap_err();
    assert!(matches!(err, KernelError::InvalidRef(_)));
}

#[tokio::test]
async fn restart_resumes_mid_queue_without_loss_or_duplication() {
    let mut tk = TestKernel::new().await;
    let vat = tk.launch("alice", "counter").await;

    let r1 = tk.kernel.queue_message(vat.root, "inc", CapData::null()).unwrap();
    let r2 = tk.kernel.queue_message(vat.root, "inc", CapData::null()).unwrap();
    let r3 = tk.kernel.queue_message(vat.root, "inc", CapData::null()).unwrap();

    // One crank, then the "process" dies.
    assert!(tk.kernel.step().await.unwrap());
    let mut tk = tk.reopen().await;
    tk.kernel.run().await.unwrap();

    // Nothing repeated, nothing lost.
    assert_eq!(tk.vatstore(vat.vat_id, "count").as_deref(), Some("3"));
    assert_eq!(tk.fulfilled(r1).body, "\"1\"");
    assert_eq!(tk.fulfilled(r2).body, "\"2\"");
    assert_eq!(tk.fulfilled(r3).body, "\"3\"");
}

#[tokio::test]
async fn subcluster_bootstrap_and_termination() {
    let mut tk = TestKernel::new().await;
    let cluster = ClusterConfig {
        bootstrap: "alice".to_string(),
        vats: vec![
            VatConfig::new("alice", BundleSpec::named("keeper")),
            VatConfig::new("bob", BundleSpec::named("greeter")),
        ],
    };

    let launched = tk.kernel.launch_subcluster(cluster).await.unwrap();
    tk.kernel.run().await.unwrap();

    assert_eq!(launched.vats.len(), 2);
    let alice = &launched.vats[0];
    assert_eq!(alice.name, "alice");

    // The bootstrap vat received every member's root by name.
    let intro = tk.vatstore(alice.vat_id, "intro").expect("bootstrap ran");
    assert!(intro.contains("\"alice\""));
    assert!(intro.contains("\"bob\""));
    tk.fulfilled(launched.bootstrap_result);

    tk.kernel
        .terminate_subcluster(launched.subcluster_id)
        .await
        .unwrap();
    let status = tk.kernel.get_status().unwrap();
    assert!(status
        .vats
        .iter()
        .all(|v| v.state == "terminated"));
    assert!(status.subclusters.is_empty());
}

#[tokio::test]
async fn operator_errors_leave_no_trace() {
    let mut tk = TestKernel::new().await;
    let vat = tk.launch("alice", "greeter").await;

    let err = tk.kernel.terminate_vat(VatId::new(99)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::VatNotFound);

    let err = tk
        .kernel
        .launch_vat(VatConfig::new("alice", BundleSpec::named("greeter")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::VatAlreadyExists);

    let err = tk
        .kernel
        .queue_message(KernelRef::Object(404), "ping", CapData::null())
        .unwrap_err();
    assert!(matches!(err, KernelError::InvalidRef(_)));

    // None of the failures queued anything.
    assert!(tk.kernel.queue_is_empty().unwrap());

    // The one real vat is untouched.
    let ping = tk.call(vat.root, "ping", CapData::null()).await;
    assert_eq!(tk.fulfilled(ping).body, "\"hi\"");
}

#[tokio::test]
async fn clear_state_resets_everything() {
    let mut tk = TestKernel::new().await;
    let vat = tk.launch("alice", "counter").await;
    let r = tk.call(vat.root, "inc", CapData::null()).await;
    tk.fulfilled(r);

    tk.kernel.clear_state().await.unwrap();

    let status = tk.kernel.get_status().unwrap();
    assert!(status.vats.is_empty());
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.object_count, 0);
    assert_eq!(status.promise_count, 0);

    // The store is immediately usable again.
    let vat = tk.launch("alice", "counter").await;
    let r = tk.call(vat.root, "inc", CapData::null()).await;
    assert_eq!(tk.fulfilled(r).body, "\"1\"");
}

#[tokio::test]
async fn db_query_sees_the_persistent_layout() {
    let mut tk = TestKernel::new().await;
    let vat = tk.launch("alice", "greeter").await;

    let rows = tk
        .kernel
        .execute_db_query("SELECT key, value FROM kv WHERE key LIKE 'vat.%'")
        .unwrap();
    assert!(rows
        .iter()
        .any(|r| r.key == format!("vat.{}.state", vat.vat_id) && r.value == "running"));

    let rows = tk
        .kernel
        .execute_db_query("SELECT key, value FROM kv WHERE key LIKE 'kernel.schemaVersion'")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, "1");
}
