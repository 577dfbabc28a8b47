//! Property tests for deployment step scheduling.

use proptest::prelude::*;

use drover::planner::{
    resolve_step_groups, DeploymentStep, FINAL_GROUP_ID, FINAL_STEP_WEIGHT, FIRST_GROUP_ID,
};

// Names are globally unique so the (group, weight, name) sort is a total
// order; weights stay clear of the reserved final weight.
fn steps() -> impl Strategy<Value = Vec<DeploymentStep>> {
    proptest::collection::btree_map(
        proptest::string::string_regex("[a-z][a-z_]{2,11}").unwrap(),
        (
            proptest::string::string_regex("[a-z]{3,8}").unwrap(),
            FIRST_GROUP_ID..=FINAL_GROUP_ID,
            -500i32..=500,
            any::<bool>(),
        ),
        1..24,
    )
    .prop_map(|map| {
        map.into_iter()
            .map(|(name, (module, group_id, weight, parallel))| {
                let step = DeploymentStep::new(&name, &module, group_id, weight);
                if parallel {
                    step
                } else {
                    step.serial()
                }
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: resolution keeps every step, orders groups by ascending
    /// id, and orders steps inside a group by weight then name.
    #[test]
    fn property_groups_are_ordered_and_complete(steps in steps()) {
        let total = steps.len();
        let groups = resolve_step_groups(steps);
        prop_assert!(groups.is_ok(), "{:?}", groups.err());
        let groups = groups.unwrap();

        let scheduled: usize = groups.iter().map(|g| g.steps.len()).sum();
        prop_assert_eq!(scheduled, total);

        for pair in groups.windows(2) {
            prop_assert!(pair[0].group_id < pair[1].group_id);
        }
        for group in &groups {
            for step in &group.steps {
                prop_assert_eq!(step.group_id, group.group_id);
            }
            for pair in group.steps.windows(2) {
                let left = (pair[0].weight, pair[0].name.as_str());
                let right = (pair[1].weight, pair[1].name.as_str());
                prop_assert!(left <= right, "{:?} sorted after {:?}", left, right);
            }
        }
    }

    /// PROPERTY: the schedule is a pure function of the step set; the
    /// order modules register steps in cannot change it.
    #[test]
    fn property_resolution_ignores_registration_order(steps in steps()) {
        let mut reversed = steps.clone();
        reversed.reverse();
        prop_assert_eq!(
            resolve_step_groups(steps).unwrap(),
            resolve_step_groups(reversed).unwrap()
        );
    }

    /// PROPERTY: the reserved final weight is rejected anywhere but the
    /// final group.
    #[test]
    fn property_stray_final_weight_is_rejected(
        steps in steps(),
        group_id in FIRST_GROUP_ID..FINAL_GROUP_ID
    ) {
        let mut with_stray = steps;
        with_stray.push(DeploymentStep::new(
            "zz_final_weight_probe",
            "probe",
            group_id,
            FINAL_STEP_WEIGHT,
        ));
        prop_assert!(resolve_step_groups(with_stray).is_err());
    }

    /// PROPERTY: a step registered twice by the same module is rejected.
    #[test]
    fn property_duplicate_registration_is_rejected(steps in steps()) {
        let mut with_dup = steps.clone();
        with_dup.push(steps[0].clone());
        prop_assert!(resolve_step_groups(with_dup).is_err());
    }

    /// PROPERTY: group ids outside the schedulable range are rejected.
    #[test]
    fn property_out_of_range_group_is_rejected(steps in steps(), offset in 1i32..50) {
        let mut above = steps.clone();
        above.push(DeploymentStep::new(
            "zz_range_probe",
            "probe",
            FINAL_GROUP_ID + offset,
            0,
        ));
        prop_assert!(resolve_step_groups(above).is_err());

        let mut below = steps;
        below.push(DeploymentStep::new(
            "zz_range_probe",
            "probe",
            FIRST_GROUP_ID - offset,
            0,
        ));
        prop_assert!(resolve_step_groups(below).is_err());
    }
}
