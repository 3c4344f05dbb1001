//! Sortable identifiers for content records and operations.

use uuid::Uuid;

/// Generate a time-ordered, collision-resistant identifier.
///
/// UUID v7 carries a millisecond timestamp prefix followed by random
/// bits, so ids assigned later sort lexicographically after earlier
/// ones while staying unguessable.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}
