//! Property-based test generators using proptest.
//!
//! Provides strategies for generating entities that pass validation and
//! failure patterns for mirror fault injection.

use crate::builders::{fixed_time, tana};
use lalantsika_model::{Location, Report, ReportStatus, User};
use proptest::prelude::*;

/// Strategy for generating valid, lowercase emails.
pub fn email_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}@[a-z]{2,8}\\.(mg|com|org)")
        .expect("Invalid regex")
}

/// Strategy for generating valid users.
pub fn user_strategy() -> impl Strategy<Value = User> {
    (
        email_strategy(),
        prop::string::string_regex("[A-Z][a-z]{1,15}").expect("Invalid regex"),
    )
        .prop_map(|(email, name)| User::new(email, name))
}

/// Strategy for generating distinct users (emails are unique).
pub fn distinct_users_strategy(
    size: impl Into<prop::collection::SizeRange>,
) -> impl Strategy<Value = Vec<User>> {
    prop::collection::btree_map(email_strategy(), user_strategy(), size).prop_map(|users| {
        users
            .into_iter()
            .map(|(email, user)| User { email, ..user })
            .collect()
    })
}

/// Strategy for generating coordinates inside Madagascar.
pub fn location_strategy() -> impl Strategy<Value = Location> {
    (-25.6f64..-11.9, 43.2f64..50.5).prop_map(|(latitude, longitude)| Location {
        latitude,
        longitude,
    })
}

/// Strategy for generating valid reports.
pub fn report_strategy() -> impl Strategy<Value = Report> {
    (
        prop::string::string_regex("[a-z]{3,12}( [a-z]{2,10}){0,4}").expect("Invalid regex"),
        0i64..10_000_000,
        0.0f64..500.0,
        prop_oneof![Just(tana()), location_strategy()],
    )
        .prop_map(|(description, budget, surface_m2, location)| Report {
            description,
            budget,
            surface_m2,
            location,
            user_id: None,
            reporter: None,
            company_id: None,
            remote_key: None,
            reported_at: fixed_time(),
        })
}

/// Strategy for generating report statuses.
pub fn status_strategy() -> impl Strategy<Value = ReportStatus> {
    prop_oneof![
        Just(ReportStatus::New),
        Just(ReportStatus::InProgress),
        Just(ReportStatus::Completed),
    ]
}

/// Strategy for a batch size and the indexes whose mirror writes fail.
///
/// Yields `(n, failing)` with `1 <= n < max` and every index in
/// `failing` below `n`.
pub fn failure_pattern_strategy(max: usize) -> impl Strategy<Value = (usize, Vec<usize>)> {
    (1..max.max(2)).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec(any::<bool>(), n).prop_map(|flags| {
                flags
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, failing)| failing.then_some(i))
                    .collect::<Vec<_>>()
            }),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lalantsika_model::Entity;

    proptest! {
        #[test]
        fn generated_users_are_valid(user in user_strategy()) {
            prop_assert!(user.validate().is_ok());
        }

        #[test]
        fn generated_reports_are_valid(report in report_strategy()) {
            prop_assert!(report.validate().is_ok());
        }

        #[test]
        fn failure_patterns_stay_in_range((n, failing) in failure_pattern_strategy(20)) {
            prop_assert!(n >= 1);
            prop_assert!(failing.iter().all(|&i| i < n));
        }
    }
}
