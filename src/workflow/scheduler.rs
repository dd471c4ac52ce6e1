//! Task Scheduler
//!
//! Pure functions over stage records. Nothing here touches a running
//! workflow: the coordinator hands in the current `stages` snapshot and
//! gets back what may start next.
//!
//! ## Ordering
//!
//! Stages are planned in topological order. When several stages are ready
//! at once the one declared earlier (outline, content, polish, chart) wins.

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use super::run::{RunConfig, StageName, StageState, StageStatus};

// =============================================================================
// Stage Graph
// =============================================================================

/// Declaration of one stage in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: StageName,
    pub depends_on: Vec<StageName>,
    pub enabled: bool,
    pub mandatory: bool,
}

impl StageSpec {
    pub fn new(name: StageName, depends_on: &[StageName]) -> Self {
        Self {
            name,
            depends_on: depends_on.to_vec(),
            enabled: true,
            mandatory: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("stage '{0}' declared twice")]
    Duplicate(StageName),

    #[error("stage '{stage}' depends on undeclared stage '{dependency}'")]
    UnknownDependency {
        stage: StageName,
        dependency: StageName,
    },

    #[error("dependency cycle among stages: {0:?}")]
    Cycle(Vec<StageName>),
}

/// Validated stage DAG in planned execution order
#[derive(Debug, Clone)]
pub struct StageGraph {
    specs: Vec<StageSpec>,
}

impl StageGraph {
    /// Standard pipeline: outline → content → {polish, chart}
    pub fn for_config(config: &RunConfig) -> Result<Self, GraphError> {
        let specs = StageName::ALL
            .iter()
            .map(|&name| StageSpec {
                name,
                depends_on: name.depends_on().to_vec(),
                enabled: config.is_enabled(name),
                mandatory: config.is_mandatory(name),
            })
            .collect();
        Self::new(specs)
    }

    /// Validate and order a set of stage declarations (Kahn's algorithm,
    /// ties broken by declaration order).
    pub fn new(specs: Vec<StageSpec>) -> Result<Self, GraphError> {
        let mut position: HashMap<StageName, usize> = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if position.insert(spec.name, i).is_some() {
                return Err(GraphError::Duplicate(spec.name));
            }
        }

        let mut in_degree = vec![0usize; specs.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.depends_on {
                let &d = position.get(dep).ok_or(GraphError::UnknownDependency {
                    stage: spec.name,
                    dependency: *dep,
                })?;
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        // Ready set keyed by declaration position
        let mut ready: BTreeSet<usize> = (0..specs.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(specs.len());

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != specs.len() {
            let stuck = (0..specs.len())
                .filter(|i| !order.contains(i))
                .map(|i| specs[i].name)
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        let mut slots: Vec<Option<StageSpec>> = specs.into_iter().map(Some).collect();
        let specs = order.into_iter().filter_map(|i| slots[i].take()).collect();
        Ok(Self { specs })
    }

    /// Stage names in planned order
    pub fn order(&self) -> Vec<StageName> {
        self.specs.iter().map(|s| s.name).collect()
    }

    pub fn specs(&self) -> &[StageSpec] {
        &self.specs
    }

    /// Fresh stage records; disabled stages start `Skipped`
    pub fn initial_states(&self) -> Vec<StageState> {
        self.specs
            .iter()
            .map(|spec| {
                let mut state = if spec.enabled {
                    StageState::new(spec.name, spec.mandatory)
                } else {
                    StageState::disabled(spec.name)
                };
                state.depends_on = spec.depends_on.clone();
                state
            })
            .collect()
    }
}

// =============================================================================
// Scheduling Queries
// =============================================================================

/// Idle stages whose dependencies all succeeded or were skipped, in
/// declaration order.
pub fn eligible(states: &[StageState]) -> Vec<StageName> {
    let status_of: HashMap<StageName, StageStatus> =
        states.iter().map(|s| (s.name, s.status)).collect();

    let mut ready: Vec<StageName> = states
        .iter()
        .filter(|s| s.status == StageStatus::Idle)
        .filter(|s| {
            s.depends_on.iter().all(|dep| {
                status_of
                    .get(dep)
                    .is_some_and(|status| status.satisfies_dependency())
            })
        })
        .map(|s| s.name)
        .collect();

    ready.sort_by_key(|name| name.declaration_index());
    ready
}

/// Terminal enabled stages over enabled stages, in `0.0..=1.0`
pub fn progress_fraction(states: &[StageState]) -> f64 {
    let enabled: Vec<&StageState> = states.iter().filter(|s| s.is_enabled()).collect();
    if enabled.is_empty() {
        return 1.0;
    }
    let terminal = enabled.iter().filter(|s| s.status.is_terminal()).count();
    terminal as f64 / enabled.len() as f64
}

/// Every enabled stage reached a terminal status
pub fn is_settled(states: &[StageState]) -> bool {
    states.iter().all(|s| s.status.is_terminal())
}

/// Every stage that was not skipped succeeded
pub fn all_succeeded(states: &[StageState]) -> bool {
    states
        .iter()
        .all(|s| matches!(s.status, StageStatus::Succeeded | StageStatus::Skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::workflow::run::{ReportRequest, SkipReason};
    use proptest::prelude::*;

    fn config(polish: bool, charts: bool) -> RunConfig {
        ReportRequest::new("scheduler topic")
            .with_polish(polish)
            .with_charts(charts)
            .validate(&ValidationConfig::default())
            .unwrap()
    }

    fn set(states: &mut [StageState], name: StageName, status: StageStatus) {
        if let Some(s) = states.iter_mut().find(|s| s.name == name) {
            s.status = status;
        }
    }

    #[test]
    fn test_standard_order() {
        let graph = StageGraph::for_config(&config(true, true)).unwrap();
        assert_eq!(
            graph.order(),
            vec![
                StageName::Outline,
                StageName::Content,
                StageName::Polish,
                StageName::Chart
            ]
        );
    }

    #[test]
    fn test_disabled_stages_start_skipped() {
        let graph = StageGraph::for_config(&config(false, false)).unwrap();
        let states = graph.initial_states();
        let polish = states.iter().find(|s| s.name == StageName::Polish).unwrap();
        assert_eq!(polish.status, StageStatus::Skipped);
        assert_eq!(polish.skip_reason, Some(SkipReason::Disabled));
    }

    #[test]
    fn test_only_outline_eligible_initially() {
        let states = StageGraph::for_config(&config(true, true))
            .unwrap()
            .initial_states();
        assert_eq!(eligible(&states), vec![StageName::Outline]);
    }

    #[test]
    fn test_polish_and_chart_ready_together_in_declaration_order() {
        let mut states = StageGraph::for_config(&config(true, true))
            .unwrap()
            .initial_states();
        set(&mut states, StageName::Outline, StageStatus::Succeeded);
        assert_eq!(eligible(&states), vec![StageName::Content]);

        set(&mut states, StageName::Content, StageStatus::Running);
        assert!(eligible(&states).is_empty());

        set(&mut states, StageName::Content, StageStatus::Succeeded);
        assert_eq!(eligible(&states), vec![StageName::Polish, StageName::Chart]);
    }

    #[test]
    fn test_failed_dependency_blocks() {
        let mut states = StageGraph::for_config(&config(true, true))
            .unwrap()
            .initial_states();
        set(&mut states, StageName::Outline, StageStatus::Failed);
        assert!(eligible(&states).is_empty());
        assert!(!is_settled(&states));
    }

    #[test]
    fn test_progress_ignores_disabled_stages() {
        let mut states = StageGraph::for_config(&config(false, false))
            .unwrap()
            .initial_states();
        assert_eq!(progress_fraction(&states), 0.0);
        set(&mut states, StageName::Outline, StageStatus::Succeeded);
        assert_eq!(progress_fraction(&states), 0.5);
        set(&mut states, StageName::Content, StageStatus::Succeeded);
        assert_eq!(progress_fraction(&states), 1.0);
        assert!(all_succeeded(&states));
    }

    #[test]
    fn test_graph_rejects_cycle_and_unknown() {
        let cycle = StageGraph::new(vec![
            StageSpec::new(StageName::Outline, &[StageName::Content]),
            StageSpec::new(StageName::Content, &[StageName::Outline]),
        ]);
        assert!(matches!(cycle, Err(GraphError::Cycle(_))));

        let unknown = StageGraph::new(vec![StageSpec::new(
            StageName::Content,
            &[StageName::Outline],
        )]);
        assert!(matches!(
            unknown,
            Err(GraphError::UnknownDependency { .. })
        ));

        let duplicate = StageGraph::new(vec![
            StageSpec::new(StageName::Outline, &[]),
            StageSpec::new(StageName::Outline, &[]),
        ]);
        assert_eq!(duplicate.unwrap_err(), GraphError::Duplicate(StageName::Outline));
    }

    #[test]
    fn test_topological_order_overrides_declaration() {
        let graph = StageGraph::new(vec![
            StageSpec::new(StageName::Chart, &[StageName::Outline]),
            StageSpec::new(StageName::Outline, &[]),
        ])
        .unwrap();
        assert_eq!(graph.order(), vec![StageName::Outline, StageName::Chart]);
    }

    proptest! {
        /// Drive the scheduler to completion, finishing running stages in an
        /// arbitrary order, and check gating and start order.
        #[test]
        fn prop_start_order_respects_dependencies(
            polish in any::<bool>(),
            charts in any::<bool>(),
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 8),
        ) {
            let mut states = StageGraph::for_config(&config(polish, charts))
                .unwrap()
                .initial_states();
            let mut started: Vec<StageName> = Vec::new();
            let mut running: Vec<StageName> = Vec::new();
            let mut picks = picks.into_iter();

            loop {
                let ready = eligible(&states);
                // Deterministic for an unchanged snapshot
                prop_assert_eq!(&ready, &eligible(&states));
                let mut sorted = ready.clone();
                sorted.sort();
                prop_assert_eq!(&sorted, &ready);

                for name in ready {
                    let deps = name.depends_on();
                    for dep in deps {
                        let status = states.iter().find(|s| s.name == *dep).unwrap().status;
                        prop_assert!(status.satisfies_dependency());
                    }
                    set(&mut states, name, StageStatus::Running);
                    started.push(name);
                    running.push(name);
                }

                if running.is_empty() {
                    break;
                }
                let idx = picks.next().map(|p| p.index(running.len())).unwrap_or(0);
                let done = running.remove(idx);
                set(&mut states, done, StageStatus::Succeeded);
            }

            prop_assert!(is_settled(&states));
            prop_assert!(all_succeeded(&states));
            prop_assert_eq!(progress_fraction(&states), 1.0);

            let expected: Vec<StageName> = StageName::ALL
                .iter()
                .copied()
                .filter(|&s| match s {
                    StageName::Polish => polish,
                    StageName::Chart => charts,
                    _ => true,
                })
                .collect();
            prop_assert_eq!(started, expected);
        }
    }
}
