//! End-to-end buffer growth.
//!
//! Grows a session from an empty box to 250 000 entities against a
//! 100 000-entity initial buffer. The executor must fence the region,
//! request a resize, and resume only after the driver rebinds a buffer
//! large enough, with every previously copied position preserved.

use std::time::Duration;

use tandem_core::{DataField, DataValue, EventKind, PositionsUpdate};
use tandem_lattice::{LatticeConfig, LatticeEngine};
use tandem_runtime::{ExecutorState, SessionConfig, SimulationSession};
use tandem_test_utils::EventLog;

fn session(initial_capacity: usize) -> SimulationSession {
    let config = SessionConfig {
        command_timeout: Duration::from_secs(60),
        initial_capacity,
        ..SessionConfig::default()
    };
    SimulationSession::spawn(|| Ok(LatticeEngine::new(LatticeConfig::default())), config).unwrap()
}

#[test]
fn grows_past_initial_capacity_and_keeps_prefix() {
    let mut session = session(100_000);
    let resizes = EventLog::new();
    session.on(EventKind::Resize, resizes.observer());

    session.init().wait().unwrap();
    session.run_script("create_atoms 10").wait().unwrap();
    let copied = session.update_positions().wait().unwrap();
    assert_eq!(copied.positions(), Some(PositionsUpdate::Copied { entities: 10 }));
    let prefix = session.read_positions().unwrap();
    assert_eq!(prefix.len(), 30);

    session.run_script("create_atoms 249990").wait().unwrap();

    let meta = session.metadata();
    assert_eq!(meta.entity_count, 250_000);
    assert!(meta.capacity >= 250_000);
    assert!(!meta.resizing);
    assert_eq!(session.resize_count(), 1);
    assert_eq!(resizes.count(EventKind::Resize), 1);
    assert_eq!(session.positions_buffer().capacity() as u64, meta.capacity);

    // The grown buffer carries the old contents.
    assert_eq!(session.positions_buffer().to_vec(10), prefix);

    let copied = session.update_positions().wait().unwrap();
    assert_eq!(
        copied.positions(),
        Some(PositionsUpdate::Copied { entities: 250_000 })
    );
    let all = session.read_positions().unwrap();
    assert_eq!(all.len(), 750_000);
    assert_eq!(&all[..30], &prefix[..]);

    assert_eq!(session.executor_state(), ExecutorState::Ready);
    session.shutdown();
}

#[test]
fn growth_during_a_run_resumes_the_run() {
    let mut session = session(1000);
    session.init().wait().unwrap();
    session
        .run_script("create_atoms 500\nrun 3\ncreate_atoms 2000\nrun 3")
        .wait()
        .unwrap();

    let meta = session.metadata();
    assert_eq!(meta.timestep, 6);
    assert_eq!(meta.entity_count, 2500);
    assert_eq!(meta.capacity, 5000);
    assert!(!meta.resizing);
    session.shutdown();
}

#[test]
fn positions_field_copies_through_get_data() {
    let mut session = session(1000);
    session.init().wait().unwrap();
    session.run_script("create_atoms 100").wait().unwrap();

    let output = session.get_data(&[DataField::Positions]).wait().unwrap();
    let data = output.data().unwrap();
    assert!(matches!(
        data[&DataField::Positions],
        DataValue::Positions(PositionsUpdate::Copied { entities: 100 })
    ));
    session.shutdown();
}

#[test]
fn small_growth_uses_capacity_floor() {
    let mut session = session(10);
    session.init().wait().unwrap();
    session.run_script("create_atoms 12").wait().unwrap();
    assert_eq!(session.capacity(), 1000);
    session.shutdown();
}

#[test]
fn back_to_back_growth_keeps_fence_until_covered() {
    let mut session = session(1000);
    let resizes = EventLog::new();
    session.on(EventKind::Resize, resizes.observer());
    session.init().wait().unwrap();
    session
        .run_script("create_atoms 500\nrun 3\ncreate_atoms 2000\nrun 3\ncreate_atoms 20000\nrun 2")
        .wait()
        .unwrap();

    let meta = session.metadata();
    assert_eq!(meta.timestep, 8);
    assert_eq!(meta.entity_count, 22_500);
    assert_eq!(meta.capacity, 45_000);
    assert!(!meta.resizing);
    assert_eq!(session.resize_count(), 2);
    assert_eq!(resizes.count(EventKind::Resize), 2);

    let copied = session.update_positions().wait().unwrap();
    assert_eq!(
        copied.positions(),
        Some(PositionsUpdate::Copied { entities: 22_500 })
    );
    session.shutdown();
}
