//! Printing and parsing npm purls agree for any package name and version.

use proptest::prelude::*;
use vulnfix_types::purl::Purl;

fn arb_package_name() -> impl Strategy<Value = String> {
    (
        prop::option::of("@[a-z0-9][a-z0-9._-]{0,10}"),
        "[a-z0-9][a-z0-9._-]{0,20}",
    )
        .prop_map(|(scope, name)| match scope {
            Some(scope) => format!("{scope}/{name}"),
            None => name,
        })
}

fn arb_version() -> impl Strategy<Value = String> {
    "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}(-[a-z0-9.]{1,8})?(\\+[a-z0-9]{1,5})?"
}

proptest! {
    #[test]
    fn npm_purls_survive_display_and_parse(name in arb_package_name(), version in arb_version()) {
        let purl = Purl::npm(&name, &version);
        let text = purl.to_string();
        prop_assert!(text.starts_with("pkg:npm/"));
        prop_assert_eq!(text.matches('@').count(), 1, "only the version separator is bare: {}", text);

        let back: Purl = text.parse().unwrap();
        prop_assert_eq!(back.package_name(), name);
        prop_assert_eq!(back.version.as_deref(), Some(version.as_str()));
        prop_assert_eq!(back, purl);
    }
}
