//! Cooperative task scheduler driven by the simulation tick
//!
//! Long-running sequences such as the connection handshake are written as
//! [`Task`]s that do a slice of work each time they are resumed and then tell
//! the scheduler when they want to run again. Nothing here spawns threads; the
//! owner calls [`Scheduler::update`] once per frame with the current time.

use log::debug;
use std::time::{Duration, Instant};

/// What a task wants after being resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    NextTick,
    Sleep(Duration),
    Done,
}

pub trait Task<C>: Send {
    fn resume(&mut self, ctx: &mut C, now: Instant) -> Step;

    fn name(&self) -> &str {
        "task"
    }
}

impl<C, F> Task<C> for F
where
    F: FnMut(&mut C, Instant) -> Step + Send,
{
    fn resume(&mut self, ctx: &mut C, now: Instant) -> Step {
        self(ctx, now)
    }
}

struct Scheduled<C> {
    task: Box<dyn Task<C>>,
    wake_at: Option<Instant>,
}

pub struct Scheduler<C> {
    tasks: Vec<Scheduled<C>>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Queues a task; it first runs on the next update
    pub fn start(&mut self, task: impl Task<C> + 'static) {
        self.tasks.push(Scheduled {
            task: Box::new(task),
            wake_at: None,
        });
    }

    /// Resumes every task whose wake time has passed, in start order
    pub fn update(&mut self, now: Instant, ctx: &mut C) {
        let tasks = std::mem::take(&mut self.tasks);
        let mut remaining = Vec::with_capacity(tasks.len());

        for mut scheduled in tasks {
            if scheduled.wake_at.is_some_and(|wake_at| now < wake_at) {
                remaining.push(scheduled);
                continue;
            }
            match scheduled.task.resume(ctx, now) {
                Step::NextTick => {
                    scheduled.wake_at = None;
                    remaining.push(scheduled);
                }
                Step::Sleep(duration) => {
                    scheduled.wake_at = Some(now + duration);
                    remaining.push(scheduled);
                }
                Step::Done => debug!("Task '{}' finished", scheduled.task.name()),
            }
        }

        // Anything started while we were iterating goes after the survivors
        remaining.append(&mut self.tasks);
        self.tasks = remaining;
    }

    pub fn cancel_all(&mut self) {
        if !self.tasks.is_empty() {
            debug!("Cancelling {} scheduled task(s)", self.tasks.len());
        }
        self.tasks.clear();
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_tick_runs_every_update() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        scheduler.start(|count: &mut u32, _now: Instant| {
            *count += 1;
            Step::NextTick
        });

        let mut count = 0;
        let now = Instant::now();
        for _ in 0..3 {
            scheduler.update(now, &mut count);
        }
        assert_eq!(count, 3);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_sleep_delays_resume() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        scheduler.start(|count: &mut u32, _now: Instant| {
            *count += 1;
            Step::Sleep(Duration::from_secs(1))
        });

        let start = Instant::now();
        let mut count = 0;
        scheduler.update(start, &mut count);
        scheduler.update(start + Duration::from_millis(500), &mut count);
        assert_eq!(count, 1);

        scheduler.update(start + Duration::from_secs(1), &mut count);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_done_removes_task() {
        let mut scheduler: Scheduler<Vec<&'static str>> = Scheduler::new();
        scheduler.start(|log: &mut Vec<&'static str>, _now: Instant| {
            log.push("first");
            Step::Done
        });
        scheduler.start(|log: &mut Vec<&'static str>, _now: Instant| {
            log.push("second");
            Step::NextTick
        });

        let mut log = Vec::new();
        let now = Instant::now();
        scheduler.update(now, &mut log);
        scheduler.update(now, &mut log);

        assert_eq!(log, vec!["first", "second", "second"]);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_cancel_all() {
        let mut scheduler: Scheduler<u32> = Scheduler::new();
        scheduler.start(|_: &mut u32, _: Instant| Step::NextTick);
        scheduler.start(|_: &mut u32, _: Instant| Step::NextTick);
        scheduler.cancel_all();
        assert!(scheduler.is_empty());

        let mut count = 0;
        scheduler.update(Instant::now(), &mut count);
        assert_eq!(count, 0);
    }
}
