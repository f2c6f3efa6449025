//! Server event log.
//!
//! Events are emitted as `tracing` records under the `audit` target with the
//! event type and object class as fields, so a subscriber can route them to
//! the server log file separately from diagnostic output. Recording an event
//! never blocks the caller.

use std::fmt;

/// Why an event was logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Error,
    System,
    Admin,
    Job,
    JobUsage,
    Security,
    Sched,
    Debug,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Error => write!(f, "error"),
            EventType::System => write!(f, "system"),
            EventType::Admin => write!(f, "admin"),
            EventType::Job => write!(f, "job"),
            EventType::JobUsage => write!(f, "job_usage"),
            EventType::Security => write!(f, "security"),
            EventType::Sched => write!(f, "sched"),
            EventType::Debug => write!(f, "debug"),
        }
    }
}

/// Kind of object an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Server,
    Queue,
    Job,
    Request,
    File,
    Accounting,
    Node,
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectClass::Server => "Svr",
            ObjectClass::Queue => "Que",
            ObjectClass::Job => "Job",
            ObjectClass::Request => "Req",
            ObjectClass::File => "Fil",
            ObjectClass::Accounting => "Act",
            ObjectClass::Node => "node",
        };
        write!(f, "{}", name)
    }
}

pub fn log_event(event: EventType, class: ObjectClass, object: &str, message: &str) {
    match event {
        EventType::Debug => tracing::debug!(
            target: "audit",
            event = %event,
            class = %class,
            object,
            "{}",
            message
        ),
        EventType::Error => tracing::warn!(
            target: "audit",
            event = %event,
            class = %class,
            object,
            "{}",
            message
        ),
        _ => tracing::info!(
            target: "audit",
            event = %event,
            class = %class,
            object,
            "{}",
            message
        ),
    }
}

/// Shorthand for the common job-class event.
pub fn job_event(job_id: &str, message: &str) {
    log_event(EventType::Job, ObjectClass::Job, job_id, message);
}
