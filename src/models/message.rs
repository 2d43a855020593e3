use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum EvictionCommand {
    /// Remove the task from history once `after` has elapsed. Re-arming replaces the deadline.
    Arm { id: u64, after: Duration },
    Cancel(u64),
}
