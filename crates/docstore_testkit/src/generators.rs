//! Property-based test generators using proptest.
//!
//! Provides strategies for generating documents and key values that keep
//! the invariants the document layer relies on (non-blank keys, no floats).

use docstore_codec::{Content, Value};
use docstore_core::Document;
use proptest::prelude::*;

/// Strategy for non-blank key text, including characters that need
/// escaping in privilege strings and ids.
pub fn key_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9][A-Za-z0-9 _/+=-]{0,15}").expect("Invalid regex")
}

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        prop::string::string_regex("[a-z ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for field values: scalars and short arrays of scalars.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => scalar_strategy(),
        1 => prop::collection::vec(scalar_strategy(), 0..4).prop_map(Value::Array),
    ]
}

/// Strategy for compound key values `(orderId, lineId)`.
pub fn line_key_strategy() -> impl Strategy<Value = (String, String)> {
    (key_text_strategy(), key_text_strategy())
}

/// Strategy for valid `Order` documents, with or without the optional
/// fields.
pub fn order_strategy() -> impl Strategy<Value = Document> {
    (
        key_text_strategy(),
        key_text_strategy(),
        0i64..1000,
        prop::option::of(prop::string::string_regex("[a-z ]{1,20}").expect("Invalid regex")),
        prop::collection::vec("[a-z]{1,8}", 0..4),
    )
        .prop_map(|(order_id, customer, qty, note, tags)| {
            let mut data = Content::new();
            data.insert("orderId".into(), Value::from(order_id));
            data.insert("customer".into(), Value::from(customer));
            data.insert("qty".into(), Value::Integer(qty));
            if let Some(note) = note {
                data.insert("note".into(), Value::from(note));
            }
            if !tags.is_empty() {
                data.insert("tags".into(), Value::array(tags));
            }
            Document::from_content("Order", None, data)
        })
}

/// Strategy for field names unknown to every fixture schema.
pub fn unknown_field_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("x[a-z]{1,6}").expect("Invalid regex")
}
