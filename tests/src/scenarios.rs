//! End-to-end scenarios for both drivers.
//!
//! Every test runs a complete simulation (server, clients, mailboxes) on a
//! fresh paused-clock runtime and checks the run report: message accounting,
//! termination behavior, step-bound invariants and trace determinism.

use feddes_common::config::Control;
use feddes_common::straggler::StragglerRule;
use feddes_des::Simulation;
use feddes_sim::{run_compass, run_fedavg};

use crate::fixtures::{
    compass_config, fedavg_config, init_test_logging, run_simulation, test_platform,
};

#[test]
fn fedavg_broadcasts_and_collects_every_round() {
    init_test_logging();
    // 2 nodes x 2 clients per node -> 3 clients, 2 rounds.
    let report = run_simulation(async {
        let sim = Simulation::new(test_platform(2));
        run_fedavg(&sim, &fedavg_config(2, 2, 2)).await.unwrap()
    });

    assert_eq!(report.bootstrap_sent, 3);
    assert_eq!(report.models_sent, 6);
    assert_eq!(report.replies_received, 6);
    assert_eq!(report.global_step, 2);
    assert!(report.virtual_duration > 0.0);
}

#[test]
fn fedavg_stragglers_stretch_the_round() {
    init_test_logging();
    let baseline = run_simulation(async {
        let sim = Simulation::new(test_platform(2));
        run_fedavg(&sim, &fedavg_config(2, 2, 2)).await.unwrap()
    });

    let mut slowed_cfg = fedavg_config(2, 2, 2);
    slowed_cfg.stragglers = vec![StragglerRule::single(1, 5.0)];
    let slowed = run_simulation(async {
        let sim = Simulation::new(test_platform(2));
        run_fedavg(&sim, &slowed_cfg).await.unwrap()
    });

    // Same message counts, longer rounds: the server waits for the straggler.
    assert_eq!(slowed.models_sent, baseline.models_sent);
    assert_eq!(slowed.replies_received, baseline.replies_received);
    assert!(slowed.virtual_duration > baseline.virtual_duration);
}

#[test]
fn compass_bootstrap_groups_and_accounting() {
    init_test_logging();
    // 4 clients sharing Node-1, 5 epochs, M = 10 -> step bounds [2, 12].
    let cfg = compass_config(1, 5, 5, 10);
    let report = run_simulation(async {
        let sim = Simulation::new(test_platform(1));
        run_compass(&sim, &cfg).await.unwrap()
    });

    assert_eq!(report.global_step, 5);
    assert_eq!(report.pending_clients, 0);
    assert_eq!(report.sentinels_sent, 4);
    assert_eq!(report.bootstrap_sent, 4);

    // Every dispatched model carries a step prescription and produced
    // exactly one reply.
    assert_eq!(report.models_sent as usize, report.step_assignments.len());
    assert_eq!(report.models_sent, report.replies_received);

    // All four clients reported back at least once and have a speed sample.
    assert_eq!(report.clients.len(), 4);
    for client in &report.clients {
        assert!(client.speed >= 0.0, "client {} has no speed", client.client);
    }

    // Bootstrap prescriptions use the full budget; everything after stays
    // within the scheduler bounds.
    for assignment in &report.step_assignments[..4] {
        assert_eq!(assignment.steps, 10);
    }
    for assignment in &report.step_assignments[4..] {
        assert!(
            (2..=12).contains(&assignment.steps),
            "client {} got out-of-bounds steps {}",
            assignment.client,
            assignment.steps
        );
    }
}

#[test]
fn compass_multi_node_cohort_terminates_cleanly() {
    init_test_logging();
    // 8 clients over 3 nodes, 12 epochs, M = 20 -> step bounds [4, 24].
    let cfg = compass_config(3, 3, 12, 20);
    let report = run_simulation(async {
        let sim = Simulation::new(test_platform(3));
        run_compass(&sim, &cfg).await.unwrap()
    });

    assert_eq!(report.global_step, 12);
    assert_eq!(report.pending_clients, 0);
    assert_eq!(report.sentinels_sent, 8);
    assert_eq!(report.models_sent as usize, report.step_assignments.len());
    assert_eq!(report.models_sent, report.replies_received);
    for assignment in &report.step_assignments[8..] {
        assert!((4..=24).contains(&assignment.steps));
    }
}

#[test]
fn compass_single_epoch_drains_and_stops_all_clients() {
    init_test_logging();
    // 2 clients, 1 epoch: one scheduler tick, then drain and sentinels.
    let cfg = compass_config(1, 3, 1, 4);
    let report = run_simulation(async {
        let sim = Simulation::new(test_platform(1));
        // run_compass awaits every client actor: returning at all proves
        // both clients saw the stop sentinel and exited.
        run_compass(&sim, &cfg).await.unwrap()
    });

    assert_eq!(report.global_step, 1);
    assert_eq!(report.sentinels_sent, 2);
    assert_eq!(report.pending_clients, 0);
    assert_eq!(report.models_sent, report.replies_received);
}

#[test]
fn compass_identical_seeded_runs_match() {
    init_test_logging();
    let mut cfg = compass_config(2, 2, 6, 10);
    cfg.common.control = Control::NoisyHost;
    cfg.common.run_seed = 7;

    let first = run_simulation(async {
        let sim = Simulation::new(test_platform(2));
        run_compass(&sim, &cfg).await.unwrap()
    });
    let second = run_simulation(async {
        let sim = Simulation::new(test_platform(2));
        run_compass(&sim, &cfg).await.unwrap()
    });

    assert_eq!(first, second);
}

#[test]
fn missing_host_aborts_the_run() {
    init_test_logging();
    // Config asks for two nodes, platform only defines one.
    let cfg = compass_config(2, 2, 2, 10);
    let result = run_simulation(async {
        let sim = Simulation::new(test_platform(1));
        run_compass(&sim, &cfg).await
    });
    assert!(matches!(result, Err(feddes_common::Error::UnknownHost(_))));
}
