//! Query routing and unsupported queries.

use crate::common::*;

#[test]
fn test_unsupported_query_fails_distinctly() {
    let h = Harness::new();
    h.seed_user("en-GB", "Alex");

    let filtered = || UserQuery::all().with_locale("en-GB");
    assert!(h.users().get_all(filtered()).wait().unwrap_err().is_unsupported_query());
    assert!(h.users().count(filtered()).wait().unwrap_err().is_unsupported_query());
    assert!(h
        .users()
        .exists_by_query(filtered())
        .wait()
        .unwrap_err()
        .is_unsupported_query());
    assert!(h
        .users()
        .get_by_query(filtered())
        .wait()
        .unwrap_err()
        .is_unsupported_query());
}

#[test]
fn test_key_query_without_support() {
    let h = Harness::new();
    let a = h.seed_user("en-GB", "Alex");
    let b = h.seed_user("fr-FR", "Bea");
    h.users().clear_cache().wait().unwrap();

    let found = h
        .users()
        .get_all(UserQuery::for_users([a, b, u(999)]))
        .wait()
        .unwrap();
    assert_eq!(found.len(), 2);

    // Results are cached and dirty
    assert!(h.users().peek(&a).is_some());
    assert!(h.users().is_dirty(&b));
}

#[test]
fn test_filtered_queries_with_support() {
    let h = Harness::with_non_key_queries();
    h.seed_user("en-GB", "Alex");
    h.seed_user("en-GB", "Sam");
    let bea = h.seed_user("fr-FR", "Bea");

    let british = h
        .users()
        .get_all(UserQuery::all().with_locale("en-GB"))
        .wait()
        .unwrap();
    assert_eq!(british.len(), 2);

    let found = h
        .users()
        .get_by_query(UserQuery::all().with_name("BEA"))
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(found.key, bea);
    assert!(found.value.is_some());

    assert!(!h
        .users()
        .exists_by_query(UserQuery::all().with_locale("de-DE"))
        .wait()
        .unwrap());
}

#[test]
fn test_ambiguous_unique_query_fails() {
    let h = Harness::with_non_key_queries();
    h.seed_user("en-GB", "Alex");
    h.seed_user("en-GB", "Sam");

    let err = h
        .users()
        .get_by_query(UserQuery::all().with_locale("en-GB"))
        .wait()
        .unwrap_err();
    assert!(matches!(err, Error::Query(_)));
}
