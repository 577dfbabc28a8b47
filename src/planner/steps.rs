//! Deployment step grouping
//!
//! Modules contribute named steps, each carrying a group id and a weight.
//! Steps with the same group id run in the same phase slice; group ids
//! order the slices and weights order steps within a slice. A group is
//! parallel-safe only if every step in it allows parallel execution.

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, DroverResult};

/// Lowest schedulable group id
pub const FIRST_GROUP_ID: i32 = -100;
/// Highest schedulable group id
pub const FINAL_GROUP_ID: i32 = 100;
/// Reserved weight for the single closing step of a run
pub const FINAL_STEP_WEIGHT: i32 = 10_000;

/// One schedulable unit of deployment work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub name: String,
    /// Module that owns and executes this step
    pub module: String,
    pub group_id: i32,
    pub weight: i32,
    /// May run simultaneously with other hosts' copies of its group
    pub parallel: bool,
}

impl DeploymentStep {
    pub fn new(name: &str, module: &str, group_id: i32, weight: i32) -> DeploymentStep {
        DeploymentStep {
            name: name.to_string(),
            module: module.to_string(),
            group_id,
            weight,
            parallel: true,
        }
    }

    pub fn serial(mut self) -> DeploymentStep {
        self.parallel = false;
        self
    }
}

/// Steps sharing one group id, ordered by weight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepGroup {
    pub group_id: i32,
    pub steps: Vec<DeploymentStep>,
}

impl StepGroup {
    /// A single serial step poisons the whole group
    pub fn allows_parallel(&self) -> bool {
        self.steps.iter().all(|s| s.parallel)
    }
}

/// Sort steps into ordered groups, enforcing scheduling invariants
///
/// Group ids must sit within the schedulable range. At most one step may
/// carry the final weight; it must live in the final group and is always
/// forced serial so it runs exactly once, after everything else.
pub fn resolve_step_groups(steps: Vec<DeploymentStep>) -> DroverResult<Vec<StepGroup>> {
    let mut seen = std::collections::BTreeSet::new();
    let mut final_step: Option<String> = None;
    for step in &steps {
        if !seen.insert((step.module.clone(), step.name.clone())) {
            return Err(DroverError::configuration(
                step.name.as_str(),
                format!("module '{}' registered this step twice", step.module),
            ));
        }
        if step.group_id < FIRST_GROUP_ID || step.group_id > FINAL_GROUP_ID {
            return Err(DroverError::configuration(
                step.name.as_str(),
                format!(
                    "group id {} is outside {FIRST_GROUP_ID}..={FINAL_GROUP_ID}",
                    step.group_id
                ),
            ));
        }
        if step.weight == FINAL_STEP_WEIGHT {
            if let Some(previous) = &final_step {
                return Err(DroverError::configuration(
                    step.name.as_str(),
                    format!("final step already claimed by '{previous}'"),
                ));
            }
            if step.group_id != FINAL_GROUP_ID {
                return Err(DroverError::configuration(
                    step.name.as_str(),
                    "final-weight step must be in the final group",
                ));
            }
            final_step = Some(step.name.clone());
        }
    }

    let mut sorted = steps;
    for step in &mut sorted {
        if step.weight == FINAL_STEP_WEIGHT {
            step.parallel = false;
        }
    }
    sorted.sort_by(|a, b| {
        (a.group_id, a.weight, a.name.as_str()).cmp(&(b.group_id, b.weight, b.name.as_str()))
    });

    let mut groups: Vec<StepGroup> = Vec::new();
    for step in sorted {
        match groups.last_mut() {
            Some(group) if group.group_id == step.group_id => group.steps.push(step),
            _ => groups.push(StepGroup {
                group_id: step.group_id,
                steps: vec![step],
            }),
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_are_ordered_and_weighted() {
        let groups = resolve_step_groups(vec![
            DeploymentStep::new("report", "reporting", FINAL_GROUP_ID, FINAL_STEP_WEIGHT),
            DeploymentStep::new("write_manifests", "services", 0, 10),
            DeploymentStep::new("create_layout", "essentials", FIRST_GROUP_ID, 5),
            DeploymentStep::new("stage_config", "essentials", FIRST_GROUP_ID, 10),
            DeploymentStep::new("enable", "services", 0, 5),
        ])
        .unwrap();

        let order: Vec<(i32, &str)> = groups
            .iter()
            .flat_map(|g| g.steps.iter().map(|s| (g.group_id, s.name.as_str())))
            .collect();
        assert_eq!(
            order,
            vec![
                (FIRST_GROUP_ID, "create_layout"),
                (FIRST_GROUP_ID, "stage_config"),
                (0, "enable"),
                (0, "write_manifests"),
                (FINAL_GROUP_ID, "report"),
            ]
        );
    }

    #[test]
    fn test_final_step_is_forced_serial() {
        let groups = resolve_step_groups(vec![DeploymentStep::new(
            "report",
            "reporting",
            FINAL_GROUP_ID,
            FINAL_STEP_WEIGHT,
        )])
        .unwrap();
        assert!(!groups[0].steps[0].parallel);
        assert!(!groups[0].allows_parallel());
    }

    #[test]
    fn test_two_final_steps_are_rejected() {
        let err = resolve_step_groups(vec![
            DeploymentStep::new("a", "m1", FINAL_GROUP_ID, FINAL_STEP_WEIGHT),
            DeploymentStep::new("b", "m2", FINAL_GROUP_ID, FINAL_STEP_WEIGHT),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("already claimed"));
    }

    #[test]
    fn test_final_weight_outside_final_group_is_rejected() {
        let err = resolve_step_groups(vec![DeploymentStep::new(
            "report",
            "reporting",
            0,
            FINAL_STEP_WEIGHT,
        )])
        .unwrap_err();
        assert!(err.to_string().contains("final group"));
    }

    #[test]
    fn test_group_id_bounds_are_enforced() {
        let err = resolve_step_groups(vec![DeploymentStep::new("x", "m", 101, 0)]).unwrap_err();
        assert!(err.to_string().contains("outside"));

        let err = resolve_step_groups(vec![DeploymentStep::new("x", "m", -101, 0)]).unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn test_duplicate_step_in_module_is_rejected() {
        let err = resolve_step_groups(vec![
            DeploymentStep::new("stage", "essentials", 0, 1),
            DeploymentStep::new("stage", "essentials", 0, 2),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_same_step_name_across_modules_is_allowed() {
        let groups = resolve_step_groups(vec![
            DeploymentStep::new("enable", "services", 0, 1),
            DeploymentStep::new("enable", "managers", 0, 2),
        ])
        .unwrap();
        assert_eq!(groups[0].steps.len(), 2);
    }

    #[test]
    fn test_mixed_parallel_group_is_serial() {
        let groups = resolve_step_groups(vec![
            DeploymentStep::new("a", "m", 0, 1),
            DeploymentStep::new("b", "m", 0, 2).serial(),
        ])
        .unwrap();
        assert!(!groups[0].allows_parallel());
    }
}
