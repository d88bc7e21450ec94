//! Access control on document operations: privilege key sets, field
//! groups, profile variables and search restrictions.

use docstore_testkit::prelude::*;

fn acl(items: &[(&str, &str)]) -> Acl {
    Acl::new(items.iter().map(|(obj, act)| AclItem::new(*obj, *act)).collect())
}

fn two_customers() -> TestStore {
    let ts = TestStore::new();
    ts.save(&mut order("O1", "C1", 1), Options::new()).unwrap();
    ts.save(&mut order("O2", "C2", 2), Options::new()).unwrap();
    ts
}

#[test]
fn owner_privilege_scopes_loads() {
    let ts = two_customers();
    let orders = ts.collection("Order").unwrap();
    let c1 = acl(&[("Order/owner/C1", "read")]);
    let options = Options::new().with_acl(&c1);

    assert!(orders.load("O1", options).unwrap().is_some());
    assert!(orders.load("O2", options).unwrap().is_none());
}

#[test]
fn owner_privilege_restricts_searches() {
    let ts = two_customers();
    let orders = ts.collection("Order").unwrap();
    let c1 = acl(&[("Order/owner/C1", "read")]);
    let options = Options::new().with_acl(&c1);

    let found = orders
        .objects(Criteria::new().ge("qty", 0i64), options)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), Some("O1"));

    let err = orders.objects(Criteria::new(), options).unwrap_err();
    assert!(matches!(err, DocError::Authorization { .. }));

    let everyone = acl(&[("Order/*", "read")]);
    assert_eq!(
        orders
            .objects(Criteria::new(), Options::new().with_acl(&everyone))
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn profile_variables_fill_privileges() {
    let ts = two_customers();
    let orders = ts.collection("Order").unwrap();
    let template = acl(&[("Order/owner/{customer}", "read,delete")]);
    let profile = content(serde_json::json!({"customer": "C2"}));
    let filled = template.filled(&profile, ts.config()).unwrap();

    let options = Options::new().with_acl(&filled);
    assert!(orders.load("O1", options).unwrap().is_none());
    let o2 = orders.load("O2", options).unwrap().unwrap();

    let o1 = orders.load("O1", Options::new()).unwrap().unwrap();
    assert_eq!(orders.delete(&o1, options)[0].status, 403);
    assert_eq!(orders.delete(&o2, options)[0].status, 200);
}

#[test]
fn field_group_grants_partial_updates() {
    let ts = two_customers();
    let orders = ts.collection("Order").unwrap();
    let public = acl(&[("Order/*", "write.public")]);
    let options = Options::new().with_acl(&public);
    let mut doc = orders.load("O1", Options::new()).unwrap().unwrap();

    orders
        .update(&mut doc, &[Change::set("qty", 3i64)], options)
        .unwrap();
    orders
        .update(&mut doc, &[Change::append("tags", "rush")], options)
        .unwrap();
    assert_eq!(doc.get("tags"), Some(&Value::array(["rush"])));

    let err = orders
        .update(
            &mut doc,
            &[Change::set("qty", 4i64), Change::set("note", "late")],
            options,
        )
        .unwrap_err();
    assert!(matches!(err, DocError::Authorization { .. }));

    let writer = acl(&[("Order/owner/C1", "write")]);
    orders
        .update(
            &mut doc,
            &[Change::set("qty", 4i64), Change::set("note", "late")],
            Options::new().with_acl(&writer),
        )
        .unwrap();
    assert_eq!(doc.get("note"), Some(&Value::from("late")));
}

#[test]
fn field_group_reads_limit_search_fields() {
    let ts = two_customers();
    let orders = ts.collection("Order").unwrap();
    let public = acl(&[("Order/*", "read.public")]);
    let options = Options::new().with_acl(&public);

    let found = orders
        .objects(Criteria::new().eq("qty", 2i64), options)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].id().is_none());
    assert!(found[0].get("customer").is_none());
    assert_eq!(found[0].get("qty"), Some(&Value::Integer(2)));

    let err = orders
        .objects(Criteria::new().eq("customer", "C2"), options)
        .unwrap_err();
    assert!(matches!(err, DocError::Authorization { .. }));
}

#[test]
fn creation_needs_new_privilege() {
    with_store(|ts| {
        let orders = ts.collection("Order").unwrap();
        let reader = acl(&[("Order/*", "read")]);
        let err = orders
            .save(&mut order("O9", "C1", 1), Options::new().with_acl(&reader))
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        let creator = acl(&[("Order/owner/C1", "new")]);
        orders
            .save(&mut order("O9", "C1", 1), Options::new().with_acl(&creator))
            .unwrap();
        let err = orders
            .save(&mut order("O10", "C2", 1), Options::new().with_acl(&creator))
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    });
}

#[test]
fn empty_acl_denies_everything() {
    let ts = two_customers();
    let orders = ts.collection("Order").unwrap();
    let nothing = Acl::default();
    let options = Options::new().with_acl(&nothing);

    assert!(orders.load("O1", options).unwrap().is_none());
    assert!(orders.save(&mut order("O3", "C1", 1), options).is_err());
    assert!(orders.drop_collection(options).is_err());
    assert_eq!(
        orders.objects(Criteria::new(), Options::new()).unwrap().len(),
        2
    );
}

#[test]
fn analytics_only_see_readable_documents() {
    let ts = two_customers();
    ts.save(&mut order("O3", "C1", 4), Options::new()).unwrap();
    let orders = ts.collection("Order").unwrap();
    let request = AnalyticRequest::new()
        .filter(Criteria::new().ge("qty", 0i64))
        .group_by("customer")
        .sum("qty");

    let all = orders.analyze(&request, Options::new()).unwrap();
    assert_eq!(all.len(), 2);

    let c1 = acl(&[("Order/owner/C1", "read")]);
    let rows = orders
        .analyze(&request, Options::new().with_acl(&c1))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["customer"], Value::from("C1"));
    assert_eq!(rows[0]["count"], Value::Integer(2));
    assert_eq!(rows[0]["qty"], Value::Integer(5));

    let nobody = acl(&[]);
    let err = orders
        .analyze(&request, Options::new().with_acl(&nobody))
        .unwrap_err();
    assert!(matches!(err, DocError::Authorization { .. }));
}
