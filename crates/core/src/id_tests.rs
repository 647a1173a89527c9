// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

use super::*;

crate::define_id! {
    pub struct TestId("tst-");
}

#[test]
fn new_id_has_prefix_and_length() {
    let id = TestId::new();
    assert!(id.as_str().starts_with("tst-"));
    assert_eq!(id.as_str().len(), ID_MAX_LEN);
}

#[test]
fn new_ids_are_unique() {
    let a = TestId::new();
    let b = TestId::new();
    assert_ne!(a, b);
}

#[test]
fn from_string_roundtrips() {
    let id = TestId::from_string("tst-abc123");
    assert_eq!(id.as_str(), "tst-abc123");
    assert_eq!(id.suffix(), "abc123");
}

#[test]
fn short_truncates_suffix() {
    let id = TestId::from_string("tst-abcdefgh");
    assert_eq!(id.short(4), "abcd");
    assert_eq!(id.short(100), "abcdefgh");
}

#[test]
fn display_matches_as_str() {
    let id = TestId::from_string("tst-xyz");
    assert_eq!(format!("{id}"), "tst-xyz");
}

#[test]
fn serde_roundtrip() {
    let id = TestId::from_string("tst-roundtrip");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"tst-roundtrip\"");
    let back: TestId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn short_helper_truncates() {
    assert_eq!(short("hello world", 5), "hello");
    assert_eq!(short("hi", 5), "hi");
}
