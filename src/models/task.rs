use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Waiting,
    Processing,
    Done,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("numbers of elements should be at least one")]
    ElementAmount,
    #[error("interval shouldn't be negative")]
    NegativeInterval,
    #[error("lifetime shouldn't be negative")]
    NegativeTtl,
    #[error("{0} should be a finite number")]
    NotFinite(&'static str),
    #[error("{0} is too large")]
    OutOfRange(&'static str),
}

/// Parameters supplied by the submitter. Missing fields decode as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParams {
    pub element_amount: i64,
    pub delta: f64,
    pub first_element: f64,
    /// Seconds to sleep after each computed step.
    pub interval: f64,
    /// Seconds the finished task stays in history.
    pub ttl: f64,
}

impl TaskParams {
    pub fn new(element_amount: i64, delta: f64, first_element: f64, interval: f64, ttl: f64) -> Self {
        Self {
            element_amount,
            delta,
            first_element,
            interval,
            ttl,
        }
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.element_amount < 1 {
            return Err(TaskError::ElementAmount);
        }
        if !self.delta.is_finite() {
            return Err(TaskError::NotFinite("delta"));
        }
        if !self.first_element.is_finite() {
            return Err(TaskError::NotFinite("first_element"));
        }
        check_seconds("interval", self.interval, TaskError::NegativeInterval)?;
        check_seconds("ttl", self.ttl, TaskError::NegativeTtl)?;
        Ok(())
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval).unwrap_or_default()
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.ttl).unwrap_or_default()
    }
}

fn check_seconds(field: &'static str, value: f64, negative: TaskError) -> Result<(), TaskError> {
    if value.is_nan() {
        return Err(TaskError::NotFinite(field));
    }
    if value < 0.0 {
        return Err(negative);
    }
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(TaskError::OutOfRange(field));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    #[serde(skip)]
    pub id: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub queue_position: usize,
    pub status: TaskStatus,
    #[serde(flatten)]
    pub params: TaskParams,
    #[serde(skip_serializing_if = "is_zero")]
    pub current_iteration: u64,
    pub enqueue_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub result: Option<f64>,
}

impl Task {
    pub fn new(id: u64, params: TaskParams, enqueue_time: DateTime<Utc>) -> Self {
        Self {
            id,
            queue_position: 0,
            status: TaskStatus::Waiting,
            params,
            current_iteration: 0,
            enqueue_time,
            start_time: None,
            done_time: None,
            error: None,
            result: None,
        }
    }

    /// Waiting -> Processing. Any other transition is refused.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Waiting {
            return false;
        }
        self.status = TaskStatus::Processing;
        self.start_time = Some(now);
        true
    }

    /// Processing -> Done, recording either the sum or the failure reason.
    pub fn finish(&mut self, now: DateTime<Utc>, outcome: Result<f64, String>) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        self.status = TaskStatus::Done;
        self.current_iteration = 0;
        self.done_time = Some(now);
        match outcome {
            Ok(result) => self.result = Some(result),
            Err(reason) => self.error = Some(reason),
        }
        true
    }
}

fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}
