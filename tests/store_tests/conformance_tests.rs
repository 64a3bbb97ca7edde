//! Behaviour shared by every KvStore backend
//!
//! These tests verify:
//! - set/get/exists/delete
//! - TTL reporting, expire and lazy expiry
//! - incr/decr and append, including type errors
//! - Validation of datatypes and sizes
//! - Batch operations and their aggregate status

use std::thread;
use std::time::Duration;

use quillkv::store::{Lookup, Ttl};
use quillkv::{QuillError, StatusCode, Value};

use super::backends;

#[test]
fn test_set_get_exists() {
    for backend in backends() {
        let store = &backend.store;
        assert_eq!(
            store.set("greeting", Value::from("hello"), 0).unwrap(),
            StatusCode::Updated
        );
        assert_eq!(
            store.get("greeting").unwrap(),
            Lookup::Found(Value::from("hello")),
            "{}",
            backend.name
        );
        assert_eq!(store.exists("greeting").unwrap(), StatusCode::Found);
        assert_eq!(store.get("missing").unwrap(), Lookup::NotFound);
        assert_eq!(store.exists("missing").unwrap(), StatusCode::NotFound);
    }
}

#[test]
fn test_delete_hides_key() {
    for backend in backends() {
        let store = &backend.store;
        store.set("k", Value::Int(1), 0).unwrap();
        assert_eq!(store.delete("k").unwrap(), StatusCode::Updated);
        assert_eq!(store.get("k").unwrap(), Lookup::NotFound, "{}", backend.name);
        assert_eq!(store.exists("k").unwrap(), StatusCode::NotFound);
        assert_eq!(store.ttl("k").unwrap(), Lookup::NotFound);
    }
}

#[test]
fn test_ttl_and_expire() {
    for backend in backends() {
        let store = &backend.store;
        store.set("p", Value::Int(1), 0).unwrap();
        assert_eq!(store.ttl("p").unwrap(), Lookup::Found(Ttl::Persistent));

        assert_eq!(store.expire("p", 100).unwrap(), StatusCode::Updated);
        match store.ttl("p").unwrap() {
            Lookup::Found(Ttl::Remaining(secs)) => assert!((99..=100).contains(&secs)),
            other => panic!("{}: unexpected ttl {:?}", backend.name, other),
        }

        assert_eq!(store.expire("p", 0).unwrap(), StatusCode::Updated);
        assert_eq!(store.ttl("p").unwrap(), Lookup::Found(Ttl::Persistent));
        assert_eq!(store.expire("nobody", 5).unwrap(), StatusCode::NotFound);
    }
}

#[test]
fn test_key_expires_after_ttl() {
    for backend in backends() {
        let store = &backend.store;
        store.set("session", Value::from("token"), 1).unwrap();
        assert!(store.get("session").unwrap().is_found());

        thread::sleep(Duration::from_millis(2100));

        assert_eq!(store.get("session").unwrap(), Lookup::Expired, "{}", backend.name);
        assert_ne!(store.exists("session").unwrap(), StatusCode::Found);
    }
}

#[test]
fn test_incr_decr() {
    for backend in backends() {
        let store = &backend.store;
        store.set("counter", Value::Int(10), 0).unwrap();
        assert_eq!(store.incr_decr_integer("counter", 5, true).unwrap(), 15);
        assert_eq!(store.incr_decr_integer("counter", 3, false).unwrap(), 12);
        assert_eq!(store.get("counter").unwrap(), Lookup::Found(Value::Int(12)));

        assert_eq!(store.incr_decr_integer("fresh", 7, true).unwrap(), 7);

        store.set("text", Value::from("abc"), 0).unwrap();
        assert!(matches!(
            store.incr_decr_integer("text", 1, true),
            Err(QuillError::IncrTypeMismatch(_))
        ));
    }
}

#[test]
fn test_append() {
    for backend in backends() {
        let store = &backend.store;
        assert_eq!(store.append("log", Value::from("a")).unwrap(), Value::from("a"));
        assert_eq!(store.append("log", Value::from("b")).unwrap(), Value::from("ab"));
        assert_eq!(store.get("log").unwrap(), Lookup::Found(Value::from("ab")));

        store.set("n", Value::Int(1), 0).unwrap();
        assert!(store.append("n", Value::from("x")).is_err());
    }
}

#[test]
fn test_validation() {
    for backend in backends() {
        let store = &backend.store;
        assert!(matches!(
            store.set("list", Value::List(vec![Value::Int(1)]), 0),
            Err(QuillError::InvalidDatatype(_))
        ));
        assert!(matches!(
            store.set("big", Value::Bytes(vec![0u8; 4096]), 0),
            Err(QuillError::RecordTooBig { .. })
        ));
        assert!(matches!(
            store.append("grow", Value::Bytes(vec![0u8; 4096])),
            Err(QuillError::RecordTooBig { .. })
        ));
        assert_eq!(store.get("big").unwrap(), Lookup::NotFound);
    }
}

#[test]
fn test_batches() {
    for backend in backends() {
        let store = &backend.store;
        let set = store
            .mset(vec![
                ("a".to_string(), Value::Int(1), 0),
                ("b".to_string(), Value::Int(2), 0),
            ])
            .unwrap();
        assert_eq!(set.code, StatusCode::Updated);

        let got = store.mget(&["a", "b", "c"]).unwrap();
        assert_eq!(got.code, StatusCode::PartialFailure);
        assert_eq!(got.results[0], ("a".to_string(), Lookup::Found(Value::Int(1))));
        assert_eq!(got.results[2], ("c".to_string(), Lookup::NotFound));

        let deleted = store.mdelete(&["a", "b"]).unwrap();
        assert_eq!(deleted.code, StatusCode::Updated);
        assert_eq!(store.mget(&["a", "b"]).unwrap().code, StatusCode::PartialFailure);
    }
}
