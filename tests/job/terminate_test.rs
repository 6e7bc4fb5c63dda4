//! Forced termination tests with real subprocesses.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use procjob::dispatch::HostQueue;
use procjob::job::{Job, JobState};
use procjob::process::{JobFlags, KillScope, Signal};

#[test]
fn terminate_silent_child_fires_exit_with_signal_code() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let exits = Arc::new(Mutex::new(Vec::new()));
    let exit_sink = Arc::clone(&exits);

    let job = Job::builder(["sleep", "30"])
        .on_exit(move |pid, code| exit_sink.lock().push((pid, code)))
        .build(queue.handle());
    let pid = job.start(None).unwrap();

    assert!(job.terminate(Signal::Terminate, KillScope::Process).unwrap());
    queue.run_pending();

    let recorded = exits.lock().clone();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, pid);
    assert_ne!(recorded[0].1, 0, "SIGTERM death must not look like success");

    assert_eq!(job.state(), JobState::Terminated);
    assert!(job.pid().is_none());

    // Subsequent polls are no-ops and fire nothing further.
    job.poll();
    job.poll();
    queue.run_pending();
    assert_eq!(exits.lock().len(), 1);
}

#[test]
fn terminate_with_sigkill_works() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let exits = Arc::new(Mutex::new(Vec::new()));
    let exit_sink = Arc::clone(&exits);

    let job = Job::builder(["sleep", "30"])
        .on_exit(move |_, code| exit_sink.lock().push(code))
        .build(queue.handle());
    job.start(None).unwrap();

    assert!(job.terminate(Signal::Kill, KillScope::Process).unwrap());
    queue.run_pending();
    assert_eq!(exits.lock().as_slice(), &[-9]);
}

#[test]
fn group_leader_job_kills_its_children_too() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let job = Job::builder(["sh", "-c", "sleep 30 & wait"])
        .flags(JobFlags::new().group_leader(true))
        .build(queue.handle());
    job.start(None).unwrap();

    // Give the shell a moment to fork its sleeper.
    std::thread::sleep(Duration::from_millis(100));
    assert!(job.terminate(Signal::Terminate, KillScope::Children).unwrap());
    assert_eq!(job.state(), JobState::Terminated);
}

#[test]
fn terminate_while_poll_timer_is_armed() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let job = Job::builder(["sleep", "30"])
        .poll_interval(Duration::from_millis(10))
        .build(queue.handle());
    job.start(None).unwrap();

    std::thread::sleep(Duration::from_millis(50));
    assert!(job.terminate(Signal::Terminate, KillScope::Process).unwrap());
    assert_eq!(job.state(), JobState::Terminated);

    // No lingering tick may resurrect the job.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(job.state(), JobState::Terminated);
}

#[test]
fn dropping_a_running_job_reaps_the_process() {
    crate::init_tracing();
    let queue = HostQueue::new();
    let job = Job::builder(["sleep", "30"]).build(queue.handle());
    let pid = job.start(None).unwrap();
    drop(job);

    // Drop force-kills and reaps, so a signal-0 probe must stop finding the
    // pid shortly after.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while signal_probe(pid) {
        assert!(
            std::time::Instant::now() < deadline,
            "process survived job drop"
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Probe a pid with signal 0; true while the process still exists.
fn signal_probe(pid: u32) -> bool {
    std::process::Command::new("sh")
        .args(["-c", &format!("kill -0 {pid} 2>/dev/null")])
        .status()
        .is_ok_and(|status| status.success())
}
