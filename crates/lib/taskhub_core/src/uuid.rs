// Identifier helpers.
//
// Projects, tasks and users are keyed by UUIDv7 so that ids sort by creation
// time. Token ids (`jti`) only need to be unique and use v4.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable) as its hyphenated string form.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a random UUIDv4, used for token ids.
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parse a client-supplied id. Malformed ids yield `None` so lookups can
/// treat them as "not found" instead of failing.
pub fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_v7() {
        let id = parse_id(&new_id()).unwrap();
        assert_eq!(id.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn new_ids_are_monotonic() {
        let a = new_id();
        let b = new_id();
        assert!(b >= a);
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id("p1").is_none());
        assert!(parse_id("").is_none());
    }
}
