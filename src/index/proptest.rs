//! Property-based tests for partition naming.
//!
//! These verify the invariants the consistency layer relies on:
//!
//! - Names never exceed the index's length ceiling
//! - Names only use the `[A-Za-z0-9_]` charset
//! - Naming is a pure function of the (tenant, project) pair
//! - Distinct pairs stay distinct even when truncation kicks in

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::index::{partition_name, MAX_PARTITION_LEN};

    // Strategy for generating ids with the characters real tenants use,
    // including ones the sanitizer must rewrite.
    fn raw_id() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[a-zA-Z0-9 _.:/-]{1,80}").unwrap()
    }

    // Strategy for ids long enough to force truncation when joined.
    fn long_id() -> impl Strategy<Value = String> {
        proptest::string::string_regex("[a-z]{40,80}").unwrap()
    }

    proptest! {
        /// Partition names never exceed the ceiling.
        #[test]
        fn name_respects_length_ceiling(
            tenant in raw_id(),
            project in raw_id()
        ) {
            let name = partition_name(&tenant, &project);
            prop_assert!(
                name.len() <= MAX_PARTITION_LEN,
                "partition name {:?} has length {}",
                name,
                name.len()
            );
        }

        /// Every output character is in the sanitized charset.
        #[test]
        fn name_uses_sanitized_charset(
            tenant in raw_id(),
            project in raw_id()
        ) {
            let name = partition_name(&tenant, &project);
            prop_assert!(
                name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "partition name {:?} contains forbidden characters",
                name
            );
        }

        /// Naming is deterministic.
        #[test]
        fn name_is_deterministic(
            tenant in raw_id(),
            project in raw_id()
        ) {
            prop_assert_eq!(
                partition_name(&tenant, &project),
                partition_name(&tenant, &project)
            );
        }

        /// Distinct long pairs produce distinct names despite truncation.
        #[test]
        fn truncated_names_stay_distinct(
            tenant in long_id(),
            project_a in long_id(),
            project_b in long_id()
        ) {
            if project_a != project_b {
                let a = partition_name(&tenant, &project_a);
                let b = partition_name(&tenant, &project_b);
                prop_assert_ne!(a, b, "collision for projects {:?} vs {:?}", project_a, project_b);
            }
        }
    }
}
