// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    embedded = { "Your IP address appears to be: 70.70.70.70", Some("70.70.70.70") },
    first_of_many = { "10.0.0.1 then 10.0.0.2", Some("10.0.0.1") },
    absent = { "Your IP address appears to be", None },
    empty = { "", None },
)]
fn find_ip_address_cases(data: &str, expected: Option<&str>) {
    assert_eq!(find_ip_address(data).as_deref(), expected);
}

#[test]
fn local_hostname_is_nonempty() {
    if let Some(name) = local_hostname() {
        assert!(!name.is_empty());
    }
}
