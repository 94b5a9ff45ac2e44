//! Saved player data reads back unchanged after the cache is dropped.

use proptest::prelude::*;

use crate::common::*;

fn position() -> impl Strategy<Value = Position> {
    ("[a-z]{1,8}", -1000i32..1000, 0i32..256, -1000i32..1000)
        .prop_map(|(world, x, y, z)| Position::new(world, f64::from(x), f64::from(y), f64::from(z)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_user_fields_survive_reload(
        locale in "[a-z]{2}-[A-Z]{2}",
        last_login in any::<u64>(),
        flying in any::<bool>(),
        homes in prop::collection::btree_map("[a-z]{1,6}", position(), 0..4),
    ) {
        let h = Harness::new();
        let uuid = u(5);

        let user = h.users().get_or_new(uuid).wait().unwrap();
        {
            let mut data = user.write();
            data.set(&UserData::LOCALE, locale.clone()).unwrap();
            data.set(&UserData::LAST_LOGIN, last_login).unwrap();
            data.set(&UserData::FLYING, flying).unwrap();
            data.set(&UserData::HOMES, homes.clone()).unwrap();
        }
        h.users().save(uuid, user).wait().unwrap();
        h.users().clear_cache().wait().unwrap();

        let loaded = h.users().get(uuid).wait().unwrap().unwrap();
        let data = loaded.read();
        prop_assert_eq!(data.get(&UserData::LOCALE), Some(locale));
        prop_assert_eq!(data.get(&UserData::LAST_LOGIN), Some(last_login));
        prop_assert_eq!(data.get(&UserData::FLYING), Some(flying));
        prop_assert_eq!(data.get_or_default(&UserData::HOMES), Some(homes));
    }
}
