//! Batched writes: staging, read-through, commit and cleanup.

use docstore_core::BatchState;
use docstore_engine::{MemoryEngine, OpKind};
use docstore_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn commit_makes_every_staged_write_visible() {
    init_tracing();
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        let lines = ts.collection("OrderLine").unwrap();
        let batch = ts.batch();
        let staged = Options::new().with_batch(&batch);

        assert_eq!(
            orders.save(&mut order("B1", "C1", 1), staged).unwrap(),
            WriteOutcome::Staged
        );
        assert_eq!(
            lines.save(&mut order_line("B1", "1", 3), staged).unwrap(),
            WriteOutcome::Staged
        );
        assert_eq!(batch.len(), 2);

        assert!(orders.load("B1", Options::new()).unwrap().is_none());
        assert!(orders.load("B1", staged).unwrap().is_some());
        assert!(ts.logger.is_empty());

        let (success, message) = batch.commit(true);
        assert!(success, "{message}");
        assert_eq!(batch.state(), BatchState::Committed);
        assert_eq!(ts.engine.batch_calls(), 1);

        assert!(orders.load("B1", Options::new()).unwrap().is_some());
        assert_eq!(
            lines
                .objects(Criteria::new().eq("orderId", "B1"), Options::new())
                .unwrap()
                .len(),
            1
        );
        let ops: Vec<OpKind> = ts.logger.ops().into_iter().map(|(op, _)| op).collect();
        assert_eq!(ops, vec![OpKind::Insert, OpKind::Insert]);
    });
}

#[test]
fn failed_commit_with_cleanup_leaves_storage_untouched() {
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        let mut existing = order("A1", "C1", 1);
        orders.save(&mut existing, Options::new()).unwrap();
        ts.logger.clear();

        let batch = ts.batch();
        let staged = Options::new().with_batch(&batch);
        orders.save(&mut order("B2", "C1", 2), staged).unwrap();
        assert_eq!(orders.delete(&existing, staged)[0].status, 202);

        ts.engine.fail(Fault::Batch);
        let (success, message) = batch.commit(true);
        assert!(!success);
        assert!(message.contains("injected"));
        assert_eq!(batch.state(), BatchState::Cleaned);
        assert!(batch.is_empty());

        assert!(orders.load("A1", Options::new()).unwrap().is_some());
        assert!(orders.load("B2", Options::new()).unwrap().is_none());
        assert!(ts.logger.is_empty());

        let err = orders
            .save(&mut order("B3", "C1", 1), Options::new().with_batch(&batch))
            .unwrap_err();
        assert!(matches!(err, DocError::InvalidOperation { .. }));
    });
}

#[test]
fn failed_commit_without_cleanup_can_be_retried() {
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        let batch = ts.batch();
        orders
            .save(&mut order("B1", "C1", 1), Options::new().with_batch(&batch))
            .unwrap();

        ts.engine.fail(Fault::Batch);
        assert!(!batch.commit(false).0);
        assert_eq!(batch.state(), BatchState::Open);
        assert_eq!(batch.len(), 1);

        ts.engine.heal(Fault::Batch);
        assert!(batch.commit(false).0);
        assert!(orders.load("B1", Options::new()).unwrap().is_some());

        let (success, message) = batch.commit(true);
        assert!(!success);
        assert!(message.contains("Committed"));
    });
}

#[test]
fn staged_updates_shadow_stored_documents_in_searches() {
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        let mut stored = order("A1", "C1", 1);
        orders.save(&mut stored, Options::new()).unwrap();

        let batch = ts.batch();
        let staged = Options::new().with_batch(&batch);
        let mut doc = orders.load("A1", staged).unwrap().unwrap();
        assert_eq!(
            orders
                .update(&mut doc, &[Change::set("qty", 5i64)], staged)
                .unwrap(),
            WriteOutcome::Staged
        );
        assert_eq!(doc.get("qty"), Some(&Value::Integer(5)));

        let in_batch = orders.load("A1", staged).unwrap().unwrap();
        assert_eq!(in_batch.get("qty"), Some(&Value::Integer(5)));
        let outside = orders.load("A1", Options::new()).unwrap().unwrap();
        assert_eq!(outside.get("qty"), Some(&Value::Integer(1)));

        let five = Criteria::new().eq("qty", 5i64);
        let one = Criteria::new().eq("qty", 1i64);
        assert_eq!(orders.objects(five.clone(), staged).unwrap().len(), 1);
        assert!(orders.objects(one.clone(), staged).unwrap().is_empty());
        assert!(orders.objects(five, Options::new()).unwrap().is_empty());
        assert_eq!(orders.objects(one, Options::new()).unwrap().len(), 1);

        batch.clean();
        let after = orders.load("A1", Options::new()).unwrap().unwrap();
        assert_eq!(after.get("qty"), Some(&Value::Integer(1)));
    });
}

#[test]
fn staged_delete_hides_the_document_inside_the_batch() {
    let ts = scenarios::populated_store(2);
    let orders = ts.collection("Order").unwrap();
    let lines = ts.collection("OrderLine").unwrap();
    let batch = ts.batch();
    let staged = Options::new().with_batch(&batch);

    let line = lines
        .load(Criteria::new().eq("orderId", "O1").eq("lineId", "1"), staged)
        .unwrap()
        .unwrap();
    assert_eq!(lines.delete(&line, staged)[0].status, 202);

    let ids = lines.object_ids(&Criteria::new(), staged).unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(lines.object_ids(&Criteria::new(), Options::new()).unwrap().len(), 2);

    let o1 = orders.load("O1", staged).unwrap().unwrap();
    assert_eq!(orders.delete(&o1, staged)[0].status, 202);
    assert!(orders.load("O1", staged).unwrap().is_none());

    assert!(batch.commit(true).0);
    assert!(orders.load("O1", Options::new()).unwrap().is_none());
    assert!(lines.load(line.id().unwrap(), Options::new()).unwrap().is_none());
}

#[test]
fn batch_bound_to_another_engine_is_refused() {
    with_store(|ts| {
        let foreign = Batch::new(Arc::new(MemoryEngine::new()));
        let orders = ts.collection("Order").unwrap();
        let err = orders
            .save(&mut order("B1", "C1", 1), Options::new().with_batch(&foreign))
            .unwrap_err();
        assert!(matches!(err, DocError::InvalidOperation { .. }));
        assert!(foreign.is_empty());
    });
}

#[test]
fn dropping_an_open_batch_discards_it() {
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        {
            let batch = ts.batch();
            orders
                .save(&mut order("B1", "C1", 1), Options::new().with_batch(&batch))
                .unwrap();
        }
        assert_eq!(ts.engine.batch_calls(), 0);
        assert!(orders.load("B1", Options::new()).unwrap().is_none());
        assert!(ts.logger.is_empty());
    });
}

#[test]
fn colliding_insert_keeps_the_stored_document() {
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        orders.save(&mut order("A1", "C1", 1), Options::new()).unwrap();

        let batch = ts.batch();
        orders
            .save(&mut order("A1", "C2", 7), Options::new().with_batch(&batch))
            .unwrap();
        let (success, message) = batch.commit(true);
        assert!(!success);
        assert!(message.contains("already exists"), "{message}");

        let stored = orders.load("A1", Options::new()).unwrap().unwrap();
        assert_eq!(stored.get("customer"), Some(&Value::from("C1")));
        assert_eq!(stored.get("qty"), Some(&Value::Integer(1)));
    });
}

#[test]
fn rollback_keeps_writes_made_outside_the_batch() {
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        let mut a1 = order("A1", "C1", 1);
        orders.save(&mut a1, Options::new()).unwrap();
        orders.save(&mut order("A2", "C1", 1), Options::new()).unwrap();

        let batch = ts.batch();
        let staged = Options::new().with_batch(&batch);
        orders
            .update(&mut a1, &[Change::set("qty", 2i64)], staged)
            .unwrap();
        orders.save(&mut order("A2", "C2", 3), staged).unwrap();

        let mut direct = orders.load("A1", Options::new()).unwrap().unwrap();
        orders
            .update(&mut direct, &[Change::set("qty", 5i64)], Options::new())
            .unwrap();

        let (success, _) = batch.commit(true);
        assert!(!success);
        let a1 = orders.load("A1", Options::new()).unwrap().unwrap();
        assert_eq!(a1.get("qty"), Some(&Value::Integer(5)));
        let a2 = orders.load("A2", Options::new()).unwrap().unwrap();
        assert_eq!(a2.get("customer"), Some(&Value::from("C1")));
    });
}

#[test]
fn batch_is_closed_while_committing() {
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        let batch = ts.batch();
        orders
            .save(&mut order("B1", "C1", 1), Options::new().with_batch(&batch))
            .unwrap();

        ts.engine.pause_batches();
        std::thread::scope(|scope| {
            let first = scope.spawn(|| batch.commit(true));
            while ts.engine.batch_calls() == 0 {
                std::thread::yield_now();
            }
            assert_eq!(batch.state(), BatchState::Committing);

            let (success, message) = batch.commit(true);
            assert!(!success);
            assert!(message.contains("Committing"), "{message}");
            let err = orders
                .save(&mut order("B2", "C1", 1), Options::new().with_batch(&batch))
                .unwrap_err();
            assert!(matches!(err, DocError::InvalidOperation { .. }));

            ts.engine.resume_batches();
            let (success, message) = first.join().unwrap();
            assert!(success, "{message}");
        });

        assert_eq!(ts.engine.batch_calls(), 1);
        assert_eq!(batch.state(), BatchState::Committed);
        assert!(orders.load("B1", Options::new()).unwrap().is_some());
        assert!(orders.load("B2", Options::new()).unwrap().is_none());
    });
}
