//! Property tests over id derivation and document writes.

use docstore_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn saved_orders_are_found_by_their_key(mut doc in order_strategy()) {
        let ts = TestStore::new();
        let key = doc.get("orderId").cloned().unwrap();
        ts.save(&mut doc, Options::new()).unwrap();
        prop_assert_eq!(doc.id().map(Value::from), Some(key.clone()));

        let orders = ts.collection("Order").unwrap();
        let found = orders
            .load(Criteria::new().eq("orderId", key), Options::new())
            .unwrap()
            .unwrap();
        prop_assert_eq!(found.id(), doc.id());
        prop_assert_eq!(found.data(), doc.data());
    }

    #[test]
    fn compound_ids_recover_their_key_values((order_id, line_id) in line_key_strategy()) {
        let schema = order_line_schema();
        let keys = BTreeMap::from([
            ("orderId".to_string(), Value::from(order_id.as_str())),
            ("lineId".to_string(), Value::from(line_id.as_str())),
        ]);
        let doc_id = schema.dict_to_id(&keys).unwrap();
        let recovered = schema.id_to_dict(&doc_id).unwrap();
        prop_assert_eq!(&recovered["orderId"], &keys["orderId"]);
        prop_assert_eq!(&recovered["lineId"], &keys["lineId"]);

        let line = order_line(&order_id, &line_id, 1);
        prop_assert_eq!(schema.calculate_id(line.data()), Some(doc_id));
    }

    #[test]
    fn unknown_fields_are_not_updated(
        field in unknown_field_strategy(),
        value in value_strategy(),
    ) {
        let ts = TestStore::new();
        let orders = ts.collection("Order").unwrap();
        let mut doc = order("A1", "C1", 1);
        orders.save(&mut doc, Options::new()).unwrap();

        orders
            .update(&mut doc, &[Change::set(field.clone(), value)], Options::new())
            .unwrap();
        prop_assert!(doc.get(&field).is_none());
        let stored = orders.load("A1", Options::new()).unwrap().unwrap();
        prop_assert!(stored.get(&field).is_none());
    }

    #[test]
    fn privilege_strings_name_the_owner(doc in order_strategy()) {
        let schema = order_schema();
        let customer = doc.get("customer").unwrap().to_display_string();
        let values = schema.privilege_values(doc.data()).unwrap();
        let expected = format!("Order/owner/{customer}");
        prop_assert!(values.contains(&expected));
    }
}
