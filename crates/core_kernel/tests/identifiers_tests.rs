//! Tests for the strongly-typed identifiers

use core_kernel::{AccountId, AdjustmentId, BillId, PaymentId};
use uuid::Uuid;

mod account_id_tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        assert_ne!(AccountId::new(), AccountId::new());
    }

    #[test]
    fn test_prefix_and_display() {
        assert_eq!(AccountId::PREFIX, "ACC");
        assert!(AccountId::new().to_string().starts_with("ACC-"));
    }

    #[test]
    fn test_parse_with_and_without_prefix() {
        let original = AccountId::new();
        let with_prefix: AccountId = original.to_string().parse().unwrap();
        let bare: AccountId = original.as_uuid().to_string().parse().unwrap();

        assert_eq!(original, with_prefix);
        assert_eq!(original, bare);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = "ACC-not-a-uuid".parse::<AccountId>().unwrap_err();
        assert_eq!(err.value, "ACC-not-a-uuid");
        assert!(err.to_string().contains("ACC id"));
    }
}

mod bill_id_tests {
    use super::*;

    #[test]
    fn test_new_ids_sort_by_creation() {
        let id1 = BillId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = BillId::new();
        let uuid1: Uuid = id1.into();
        let uuid2: Uuid = id2.into();
        assert!(uuid1 < uuid2);
    }

    #[test]
    fn test_json_is_transparent_uuid() {
        let uuid = Uuid::new_v4();
        let id = BillId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));

        let back: BillId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

mod other_ids {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert!(PaymentId::new().to_string().starts_with("PAY-"));
        assert!(AdjustmentId::new().to_string().starts_with("ADJ-"));
    }

    #[test]
    fn test_uuid_round_trip() {
        let uuid = Uuid::new_v4();
        let id: PaymentId = uuid.into();
        let back: Uuid = id.into();
        assert_eq!(uuid, back);
    }
}
