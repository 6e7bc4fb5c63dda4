//! Non-blocking supervision of spawned subprocesses for single-threaded hosts.
//!
//! A [`job::Job`] owns a spawned child process and one background
//! [`reader::StreamReader`] per standard stream. The host drives the job from
//! its own loop: either by calling [`job::Job::poll`] itself or by configuring
//! a poll interval so an internal timer does it. Data and exit notifications
//! are never delivered from worker threads; they are posted to a
//! [`dispatch::HostQueue`] the host drains on its own thread.

pub mod dispatch;
pub mod job;
pub mod process;
pub mod reader;
