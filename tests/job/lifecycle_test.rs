//! End-to-end job lifecycle tests with real subprocesses.
#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use procjob::dispatch::HostQueue;
use procjob::job::{Job, JobError, JobState};
use procjob::process::SpawnError;

/// Drive the host loop until the job terminates, polling and draining
/// callbacks every `cadence`.
fn run_to_completion(queue: &HostQueue, job: &Job, cadence: Duration) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while job.state() != JobState::Terminated {
        assert!(Instant::now() < deadline, "job did not terminate in time");
        job.poll();
        queue.run_pending();
        std::thread::sleep(cadence);
    }
    queue.run_pending();
}

#[test]
fn output_is_reconstructed_and_exit_fires_once() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let output = Arc::new(Mutex::new(String::new()));
    let exits = Arc::new(Mutex::new(Vec::new()));
    let output_sink = Arc::clone(&output);
    let exit_sink = Arc::clone(&exits);

    let job = Job::builder([
        "sh",
        "-c",
        "printf 'line1\\n'; sleep 0.05; printf 'line2\\n'; sleep 0.02",
    ])
    .on_data(move |text| output_sink.lock().push_str(&text))
    .on_exit(move |pid, code| exit_sink.lock().push((pid, code)))
    .build(queue.handle());

    let pid = job.start(None).unwrap();
    assert!(job.is_running());
    assert_eq!(job.pid(), Some(pid));

    run_to_completion(&queue, &job, Duration::from_millis(10));

    assert_eq!(*output.lock(), "line1\nline2\n");
    assert_eq!(exits.lock().as_slice(), &[(pid, 0)]);
    assert!(job.pid().is_none());

    // Exit already fired; more polls must not fire it again.
    job.poll();
    job.poll();
    queue.run_pending();
    assert_eq!(exits.lock().len(), 1);
}

#[test]
fn stderr_goes_to_the_error_callback() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let output = Arc::new(Mutex::new(String::new()));
    let errors = Arc::new(Mutex::new(String::new()));
    let output_sink = Arc::clone(&output);
    let error_sink = Arc::clone(&errors);

    let job = Job::builder(["sh", "-c", "printf 'out\\n'; printf 'err\\n' >&2; sleep 0.02"])
        .on_data(move |text| output_sink.lock().push_str(&text))
        .on_error(move |text| error_sink.lock().push_str(&text))
        .build(queue.handle());
    job.start(None).unwrap();

    run_to_completion(&queue, &job, Duration::from_millis(10));

    assert_eq!(*output.lock(), "out\n");
    assert_eq!(*errors.lock(), "err\n");
}

#[test]
fn slow_host_polling_loses_no_output() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let output = Arc::new(Mutex::new(String::new()));
    let output_sink = Arc::clone(&output);

    // Child writes every 10ms; the host only polls every 200ms.
    let job = Job::builder([
        "sh",
        "-c",
        "i=0; while [ $i -lt 30 ]; do printf \"c$i\\n\"; i=$((i+1)); sleep 0.01; done",
    ])
    .on_data(move |text| output_sink.lock().push_str(&text))
    .build(queue.handle());
    job.start(None).unwrap();

    run_to_completion(&queue, &job, Duration::from_millis(200));

    let expected: String = (0..30).map(|i| format!("c{i}\n")).collect();
    assert_eq!(*output.lock(), expected);
}

#[test]
fn timer_driven_job_needs_no_explicit_polls() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let output = Arc::new(Mutex::new(String::new()));
    let exits = Arc::new(Mutex::new(Vec::new()));
    let output_sink = Arc::clone(&output);
    let exit_sink = Arc::clone(&exits);

    let job = Job::builder(["sh", "-c", "printf 'ticked\\n'; sleep 0.05"])
        .poll_interval(Duration::from_millis(10))
        .on_data(move |text| output_sink.lock().push_str(&text))
        .on_exit(move |_, code| exit_sink.lock().push(code))
        .build(queue.handle());
    job.start(None).unwrap();

    // The host only drains its queue; the internal tick does the polling.
    let deadline = Instant::now() + Duration::from_secs(10);
    while job.state() != JobState::Terminated {
        assert!(Instant::now() < deadline, "job did not terminate in time");
        queue.run_pending();
        std::thread::sleep(Duration::from_millis(10));
    }
    queue.run_pending();

    assert_eq!(*output.lock(), "ticked\n");
    assert_eq!(exits.lock().as_slice(), &[0]);
}

#[test]
fn nonzero_exit_code_is_reported() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let exits = Arc::new(Mutex::new(Vec::new()));
    let exit_sink = Arc::clone(&exits);

    let job = Job::builder(["sh", "-c", "exit 7"])
        .on_exit(move |_, code| exit_sink.lock().push(code))
        .build(queue.handle());
    job.start(None).unwrap();

    run_to_completion(&queue, &job, Duration::from_millis(10));
    assert_eq!(exits.lock().as_slice(), &[7]);
}

#[test]
fn spawn_error_propagates_from_start() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let job = Job::builder(["procjob-no-such-binary"]).build(queue.handle());
    assert!(matches!(
        job.start(None),
        Err(JobError::Spawn(SpawnError::NotFound(_)))
    ));
    assert_eq!(job.state(), JobState::Idle);
}

#[test]
fn command_cannot_change_while_running() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let job = Job::builder(["sh", "-c", "sleep 1"]).build(queue.handle());

    job.set_command(["sh", "-c", "sleep 1"]).unwrap();
    job.start(None).unwrap();
    assert!(matches!(
        job.set_command(["echo", "nope"]),
        Err(JobError::MutableWhileRunning { .. })
    ));

    run_to_completion(&queue, &job, Duration::from_millis(20));
    job.set_command(["echo", "fine"]).unwrap();
}
