//! Tandem steering session: drive a running engine from the caller's thread.
//!
//! Demonstrates:
//!   1. Spawning a session whose engine lives on the executor thread
//!   2. Subscribing to engine log and step events
//!   3. Starting a long run and pausing, inspecting and resuming it
//!   4. Growing the positions buffer past its initial capacity
//!   5. Reading counters and positions from the shared region
//!   6. Cancelling the run and shutting down
//!
//! Commands after the long run are given as text lines, the way a
//! front end would forward them, and parsed through `CommandKind`.
//!
//! Run with:
//!   cargo run --example steer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tandem::prelude::*;
use tandem::types::FieldList;

/// Turn one `kind [argument]` line into a command.
fn parse_line(line: &str) -> Result<Command, CommandError> {
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let command = match word.parse::<CommandKind>()? {
        CommandKind::RunScript => Command::RunScript {
            script: rest.replace(';', "\n"),
        },
        CommandKind::Step => Command::Step,
        CommandKind::GetData => Command::GetData {
            fields: rest
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::parse)
                .collect::<Result<FieldList, _>>()?,
        },
        CommandKind::UpdatePositions => Command::UpdatePositions,
        CommandKind::SyncComputes => Command::SyncComputes,
        CommandKind::SyncFixes => Command::SyncFixes,
        CommandKind::SyncVariables => Command::SyncVariables,
        CommandKind::Start => Command::Start,
        CommandKind::Stop => Command::Stop,
        // Init and the control commands go through session methods so the
        // shared pause flag and the executor wake-up stay consistent.
        other => return Err(CommandError::UnknownCommand(other.name().to_string())),
    };
    Ok(command)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    println!("=== Tandem Steering Example ===\n");

    // 1. Spawn the session. The engine factory runs on the executor thread
    //    when `init` arrives.
    let engine = LatticeConfig {
        step_delay: Duration::from_micros(200),
        seed: 7,
        ..LatticeConfig::default()
    };
    let config = SessionConfig {
        initial_capacity: 2_000,
        ..SessionConfig::default()
    };
    let mut session =
        SimulationSession::spawn(move || Ok(LatticeEngine::new(engine.clone())), config)?;

    // 2. Observers run on the router thread.
    let steps = Arc::new(AtomicU64::new(0));
    {
        let steps = Arc::clone(&steps);
        session.on(EventKind::Step, move |_| {
            steps.fetch_add(1, Ordering::Relaxed);
        });
    }
    session.on(EventKind::Log, |event| {
        if let Event::Log { message } = event {
            println!("  [engine] {message}");
        }
    });

    session.init().wait()?;
    println!("Initialized: {:?}", session.metadata());

    // 3. A long run, steered while it is in progress.
    session.run_script("create_atoms 500").wait()?;
    let run = session.run_script("run 50000");
    thread::sleep(Duration::from_millis(100));

    session.pause().wait()?;
    thread::sleep(Duration::from_millis(50));
    let held = session.timestep();
    println!(
        "\nPaused at timestep {held} (executor {})",
        session.executor_state()
    );

    // Queries issued mid-run wait in the executor's backlog until the
    // run ends; the shared region is readable right away.
    println!("  entities={} capacity={}", session.entity_count(), session.capacity());

    session.resume().wait()?;
    thread::sleep(Duration::from_millis(100));
    println!("Resumed, now at timestep {}", session.timestep());

    session.cancel().wait()?;
    run.wait()?;
    println!(
        "Run cancelled at timestep {} ({} step events observed)\n",
        session.timestep(),
        steps.load(Ordering::Relaxed)
    );

    // 4 and 5. Text commands, including one that outgrows the buffer.
    let lines = [
        "getData numAtoms,timesteps,isRunning",
        "runScript create_atoms 4500;run 5",
        "updatePositions",
        "getData numAtoms,timestepsPerSecond,memoryUsage",
        "syncComputes",
        "teleport",
    ];
    for line in lines {
        let outcome = match parse_line(line) {
            Ok(command) => session.send(command).wait(),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(CommandOutput::Ack) => println!("{line:<50} ok"),
            Ok(CommandOutput::Data(data)) => {
                let fields: Vec<String> = data
                    .iter()
                    .map(|(field, value)| format!("{field}={value:?}"))
                    .collect();
                println!("{line:<50} {}", fields.join(" "));
            }
            Ok(CommandOutput::Positions(update)) => println!("{line:<50} {update:?}"),
            Err(e) => println!("{line:<50} error: {e}"),
        }
    }

    let meta = session.metadata();
    println!(
        "\nRegion: {} entities, capacity {}, {} resize(s)",
        meta.entity_count,
        meta.capacity,
        session.resize_count()
    );
    let positions = session.read_positions()?;
    if let Some(first) = positions.chunks(COORDS_PER_ENTITY).next() {
        println!("First entity at {first:?}");
    }

    // 6. Shut down.
    let report = session.shutdown();
    println!(
        "\nShutdown in {}ms (drain {}ms), executor joined: {}, abandoned commands: {}",
        report.total_ms, report.drain_ms, report.executor_joined, report.abandoned_commands
    );
    Ok(())
}
