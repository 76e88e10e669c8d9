//! Action-selection bounds and decay behaviour for every strategy

use proptest::prelude::*;
use ruvector_rl::{ExplorationConfig, ExplorationPolicy, ExplorationStrategy, RlError};

const ACTIONS: usize = 4;
const CALLS: usize = 10_000;

fn policy(strategy: ExplorationStrategy, seed: u64) -> ExplorationPolicy {
    ExplorationPolicy::new(ExplorationConfig {
        strategy,
        seed: Some(seed),
    })
    .unwrap()
}

fn strategies() -> Vec<ExplorationStrategy> {
    vec![
        ExplorationStrategy::epsilon_greedy(),
        ExplorationStrategy::temperature_softmax(),
        ExplorationStrategy::entropy_guided(),
    ]
}

#[test]
fn test_actions_stay_in_range() {
    for (seed, strategy) in strategies().into_iter().enumerate() {
        let name = strategy.name();
        let mut p = policy(strategy, seed as u64);
        for i in 0..CALLS {
            let values: Vec<f64> = (0..ACTIONS)
                .map(|a| ((i * 7 + a * 13) % 17) as f64 * 0.1 - 0.8)
                .collect();
            let uncertainty: Vec<f64> = (0..ACTIONS).map(|a| ((i + a) % 5) as f64 * 0.2).collect();
            let sel = p.select_action(&values, Some(&uncertainty)).unwrap();
            assert!(sel.action < ACTIONS, "{} chose {}", name, sel.action);
        }
        let state = p.state();
        assert_eq!(state.total_actions, CALLS as u64);
        assert_eq!(
            state.exploration_count + state.exploitation_count,
            state.total_actions
        );
    }
}

#[test]
fn test_epsilon_reaches_and_holds_final() {
    let mut p = policy(
        ExplorationStrategy::EpsilonGreedy {
            initial_epsilon: 1.0,
            final_epsilon: 0.05,
            decay_steps: 100,
        },
        9,
    );
    let values = [0.1, 0.2, 0.3, 0.4];
    let mut last = p.state().current_epsilon;
    for _ in 0..100 {
        let sel = p.select_action(&values, None).unwrap();
        assert!(sel.epsilon <= last);
        last = p.state().current_epsilon;
    }
    assert_eq!(p.state().current_epsilon, 0.05);
    for _ in 0..1_000 {
        p.select_action(&values, None).unwrap();
    }
    assert_eq!(p.state().current_epsilon, 0.05);
}

#[test]
fn test_temperature_floors() {
    let mut p = policy(ExplorationStrategy::temperature_softmax(), 4);
    let values = [1.0, 0.0, -1.0, 0.5];
    for _ in 0..CALLS {
        p.select_action(&values, None).unwrap();
    }
    assert_eq!(p.state().current_temperature, 0.1);
}

#[test]
fn test_greedy_after_decay_exploits() {
    let mut p = policy(
        ExplorationStrategy::EpsilonGreedy {
            initial_epsilon: 0.0,
            final_epsilon: 0.0,
            decay_steps: 1,
        },
        1,
    );
    for _ in 0..100 {
        let sel = p.select_action(&[0.3, 0.9, 0.9, 0.1], None).unwrap();
        assert_eq!(sel.action, 1);
        assert!(!sel.is_exploration);
    }
}

#[test]
fn test_unknown_strategy_name() {
    assert!(matches!(
        ExplorationPolicy::from_name("thompson", None),
        Err(RlError::UnknownStrategy(_))
    ));
    assert!(ExplorationPolicy::from_name("boltzmann", Some(1)).is_ok());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Property: any finite value vector yields an in-range action
    #[test]
    fn prop_action_in_range(
        values in prop::collection::vec(-1e6f64..1e6f64, 1..16),
        seed in any::<u64>(),
        which in 0usize..3,
    ) {
        let strategy = strategies().swap_remove(which);
        let mut p = policy(strategy, seed);
        for _ in 0..32 {
            let sel = p.select_action(&values, None).unwrap();
            prop_assert!(sel.action < values.len());
        }
    }

    // Property: epsilon never leaves [final, initial]
    #[test]
    fn prop_epsilon_bounded(
        initial in 0.0f64..1.0,
        frac in 0.0f64..1.0,
        decay_steps in 1u64..500,
    ) {
        let final_epsilon = initial * frac;
        let mut p = policy(
            ExplorationStrategy::EpsilonGreedy { initial_epsilon: initial, final_epsilon, decay_steps },
            0,
        );
        for _ in 0..(decay_steps + 10) {
            let sel = p.select_action(&[0.0, 1.0], None).unwrap();
            prop_assert!(sel.epsilon >= final_epsilon && sel.epsilon <= initial);
        }
        prop_assert_eq!(p.state().current_epsilon, final_epsilon);
    }
}
