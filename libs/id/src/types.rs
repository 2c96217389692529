//! Typed ID definitions for the steward engine.
//!
//! Each ID type has a unique prefix that identifies what it refers to.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

define_id!(ResourceId, "res");
define_id!(RequestId, "req");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_roundtrip() {
        let id = ResourceId::new();
        let parsed = ResourceId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_wrong_prefix() {
        let id = RequestId::new();
        let err = ResourceId::parse(&id.to_string()).unwrap_err();
        assert!(matches!(err, crate::IdError::InvalidPrefix { .. }));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(ResourceId::parse(""), Err(crate::IdError::Empty));
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert_eq!(
            ResourceId::parse("res01HV4Z2WQXKJNM8GPQY6VBKC3D"),
            Err(crate::IdError::MissingSeparator)
        );
    }

    #[test]
    fn test_parse_rejects_bad_ulid() {
        let err = ResourceId::parse("res_not-a-ulid").unwrap_err();
        assert!(matches!(err, crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = ResourceId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_ids_sort_by_creation_time() {
        let a = ResourceId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = ResourceId::new();
        assert!(a < b);
    }
}
