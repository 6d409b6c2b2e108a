//! Property-based test generators using proptest.
//!
//! Values produced here survive an encode/decode round trip unchanged.

use ledgerfeed_codec::{Decimal, Timestamp, Value};
use ledgerfeed_protocol::{ChangeEvent, Fields};
use proptest::prelude::*;

/// Strategy for document IDs.
pub fn document_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9]{1,22}").expect("Invalid regex")
}

/// Strategy for scalar field values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1_000_000_000i64..1_000_000_000, -6i32..4)
            .prop_map(|(c, e)| Value::Decimal(Decimal::new(i128::from(c), e))),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::String),
        (1990u16..2100, 1u8..=12, 1u8..=28, 0u8..24, 0u8..60, 0u8..60).prop_map(
            |(y, mo, d, h, mi, s)| Value::Timestamp(Timestamp::from_utc(y, mo, d, h, mi, s))
        ),
    ]
}

/// Strategy for field values, nesting lists and structs.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
            prop::collection::btree_map("[a-z][a-zA-Z]{0,10}", inner, 0..6)
                .prop_map(|fields| Value::Struct(fields.into_iter().collect())),
        ]
    })
}

/// Strategy for a document snapshot.
pub fn fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map("[a-z][a-zA-Z]{0,12}", value_strategy(), 0..8)
}

/// Strategy for a change event of `document_id`, upsert or deletion.
pub fn event_for_strategy(
    document_id: String,
    versions: std::ops::Range<u64>,
) -> impl Strategy<Value = ChangeEvent> {
    (versions, prop::option::weighted(0.8, fields_strategy())).prop_map(
        move |(version, fields)| match fields {
            Some(fields) => ChangeEvent::upsert(document_id.clone(), version, fields),
            None => ChangeEvent::deletion(document_id.clone(), version),
        },
    )
}

/// Strategy for change events with arbitrary IDs.
pub fn change_event_strategy() -> impl Strategy<Value = ChangeEvent> {
    document_id_strategy().prop_flat_map(|id| event_for_strategy(id, 0..1_000))
}

/// Strategy for two distinct versions in ascending order.
pub fn ascending_versions_strategy() -> impl Strategy<Value = (u64, u64)> {
    (0u64..10_000, 1u64..10_000).prop_map(|(low, gap)| (low, low + gap))
}
