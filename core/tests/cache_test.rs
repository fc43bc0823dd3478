use chrono::{Duration, Utc};
use spacefx_core::cache::MAX_KEY_LEN;
use spacefx_core::proto::{ComplexMessage, SimpleMessage};
use spacefx_core::{CacheStore, CoreError};
use tempfile::tempdir;

fn make_message(text: &str) -> SimpleMessage {
    SimpleMessage {
        request_header: None,
        message: text.to_string(),
    }
}

#[test]
fn save_then_get_returns_payload() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();

    let record = cache.save("greeting", &make_message("hello"), None).unwrap();
    assert_eq!(record.name, "greeting");
    assert!(record.creation_time.is_some());
    assert!(!record.request_header.unwrap().tracking_id.is_empty());

    let got: SimpleMessage = cache.get("greeting").unwrap().unwrap();
    assert_eq!(got.message, "hello");
    assert!(cache.dir().ends_with("tmp/cache"));
}

#[test]
fn arbitrary_utf8_keys_round_trip() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();
    let keys = ["a/b/c", "spaces and ünïcödé", "🚀 launch", "..", "con"];

    for key in keys {
        cache.save(key, &make_message(key), None).unwrap();
    }
    for key in keys {
        let got: SimpleMessage = cache.get(key).unwrap().unwrap();
        assert_eq!(got.message, key);
    }

    let mut expected: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    expected.sort();
    assert_eq!(cache.list().unwrap(), expected);
}

#[test]
fn expired_item_is_missing_and_deleted() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();

    let past = Utc::now() - Duration::seconds(5);
    cache.save("stale", &make_message("old"), Some(past)).unwrap();
    assert_eq!(std::fs::read_dir(cache.dir()).unwrap().count(), 1);

    let got: Option<SimpleMessage> = cache.get("stale").unwrap();
    assert!(got.is_none());
    assert_eq!(std::fs::read_dir(cache.dir()).unwrap().count(), 0);
}

#[test]
fn missing_key_is_none_not_error() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();
    let got: Option<SimpleMessage> = cache.get("never-saved").unwrap();
    assert!(got.is_none());
    cache.delete("never-saved").unwrap();
}

#[test]
fn sweep_removes_only_expired_records() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();

    cache
        .save("old-1", &make_message("x"), Some(Utc::now() - Duration::seconds(1)))
        .unwrap();
    cache
        .save("old-2", &make_message("y"), Some(Utc::now() - Duration::minutes(3)))
        .unwrap();
    cache
        .save("fresh", &make_message("z"), Some(Utc::now() + Duration::hours(1)))
        .unwrap();
    cache.save("forever", &make_message("w"), None).unwrap();

    assert_eq!(cache.sweep_expired().unwrap(), 2);
    assert_eq!(cache.list().unwrap(), vec!["forever".to_string(), "fresh".to_string()]);
}

#[test]
fn clear_and_delete_remove_records() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();
    cache.save("one", &make_message("1"), None).unwrap();
    cache.save("two", &make_message("2"), None).unwrap();

    cache.delete("one").unwrap();
    assert_eq!(cache.list().unwrap(), vec!["two".to_string()]);

    cache.clear().unwrap();
    assert!(cache.list().unwrap().is_empty());
}

#[test]
fn reading_as_wrong_type_fails() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();
    cache.save("typed", &make_message("simple"), None).unwrap();

    let err = cache.get::<ComplexMessage>("typed").unwrap_err();
    assert!(matches!(err, CoreError::UnknownPayloadType(_)));
}

#[test]
fn empty_key_is_rejected() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();
    assert!(matches!(
        cache.save("", &make_message("x"), None),
        Err(CoreError::Cache(_))
    ));
}

#[test]
fn list_drops_expired_records_on_its_own() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();
    cache
        .save("stale", &make_message("old"), Some(Utc::now() - Duration::seconds(1)))
        .unwrap();
    cache.save("kept", &make_message("new"), None).unwrap();

    assert_eq!(cache.list().unwrap(), vec!["kept".to_string()]);
    assert_eq!(std::fs::read_dir(cache.dir()).unwrap().count(), 1);
}

#[test]
fn overlong_key_is_rejected_before_touching_disk() {
    let root = tempdir().unwrap();
    let cache = CacheStore::open(root.path()).unwrap();

    // Two bytes per character.
    let cyrillic = "ж".repeat(135);
    assert!(matches!(
        cache.save(&cyrillic, &make_message("x"), None),
        Err(CoreError::Cache(_))
    ));
    assert!(matches!(cache.get::<SimpleMessage>(&cyrillic), Err(CoreError::Cache(_))));

    let longest = "k".repeat(MAX_KEY_LEN);
    cache.save(&longest, &make_message("fits"), None).unwrap();
    let got: SimpleMessage = cache.get(&longest).unwrap().unwrap();
    assert_eq!(got.message, "fits");
    assert_eq!(cache.list().unwrap(), vec![longest]);
}
