//! Parallel task container runs.
//!
//! Workers write their task containers on separate threads while the
//! session writer merges finished tasks one at a time, as a processing run
//! does.

use crate::fixtures::event;
use evtstore_core::{CoreResult, Event, StorageWriter, Task};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for a parallel run.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Tasks executed by each worker.
    pub tasks_per_worker: usize,
    /// Events written by each task.
    pub events_per_task: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            tasks_per_worker: 3,
            events_per_task: 50,
        }
    }
}

/// Result of a parallel run.
#[derive(Debug, Clone)]
pub struct ParallelRunResult {
    /// Tasks merged into the session container.
    pub merged_tasks: usize,
    /// Events written by all tasks.
    pub events_written: usize,
    /// Wall clock duration of the run.
    pub duration: Duration,
}

/// Timestamps of the events written by task `task_number` of `worker`.
///
/// Timestamps interleave across workers and tasks so that the merged
/// container is only ordered if the merge reader orders it.
pub fn task_timestamps(config: &ParallelConfig, worker: usize, task_number: usize) -> Vec<i64> {
    let stride = config.workers * config.tasks_per_worker;
    let slot = worker * config.tasks_per_worker + task_number;
    (0..config.events_per_task)
        .rev()
        .map(|i| i64::try_from(i * stride + slot).unwrap_or(i64::MAX))
        .collect()
}

/// Runs `config.workers` threads that each write task containers, merging
/// every task into `session_writer` as soon as it is ready.
///
/// Task storage must already be started on `session_writer`.
pub fn run_parallel_tasks(
    session_writer: &mut StorageWriter,
    config: &ParallelConfig,
) -> CoreResult<ParallelRunResult> {
    let start = Instant::now();
    let (sender, receiver) = mpsc::channel::<CoreResult<(Task, usize)>>();

    let mut task_writers = Vec::new();
    for worker in 0..config.workers {
        for task_number in 0..config.tasks_per_worker {
            let task = Task::new(session_writer.session().identifier.clone());
            let task_writer = session_writer.create_task_storage(task.clone())?;
            let events: Vec<Event> = task_timestamps(config, worker, task_number)
                .into_iter()
                .map(event)
                .collect();
            task_writers.push((worker, task, task_writer, events));
        }
    }

    let mut per_worker: Vec<Vec<(Task, StorageWriter, Vec<Event>)>> =
        (0..config.workers).map(|_| Vec::new()).collect();
    for (worker, task, task_writer, events) in task_writers {
        per_worker[worker].push((task, task_writer, events));
    }

    let handles: Vec<_> = per_worker
        .into_iter()
        .map(|tasks| {
            let sender = sender.clone();
            thread::spawn(move || {
                for (task, mut task_writer, events) in tasks {
                    let result = write_task(&mut task_writer, &events)
                        .and_then(|()| task_writer.close())
                        .map(|()| (task, events.len()));
                    if sender.send(result).is_err() {
                        return;
                    }
                }
            })
        })
        .collect();
    drop(sender);

    let mut merged_tasks = 0;
    let mut events_written = 0;
    for result in receiver {
        let (task, written) = result?;
        session_writer.prepare_merge_task_storage(&task)?;
        if session_writer.merge_task_storage(&task)? {
            merged_tasks += 1;
            events_written += written;
            debug!(task = %task.identifier, merged_tasks, "merged parallel task");
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            debug!("task worker panicked");
        }
    }

    Ok(ParallelRunResult {
        merged_tasks,
        events_written,
        duration: start.elapsed(),
    })
}

fn write_task(task_writer: &mut StorageWriter, events: &[Event]) -> CoreResult<()> {
    task_writer.write_task_start()?;
    for event in events {
        task_writer.add_event(event)?;
    }
    task_writer.write_task_completion()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestContainer;
    use evtstore_core::Config;

    #[test]
    fn timestamps_interleave() {
        let config = ParallelConfig {
            workers: 2,
            tasks_per_worker: 2,
            events_per_task: 3,
        };
        assert_eq!(task_timestamps(&config, 0, 0), vec![8, 4, 0]);
        assert_eq!(task_timestamps(&config, 1, 1), vec![11, 7, 3]);
    }

    #[test]
    fn parallel_tasks_merge_into_ordered_session() {
        let container = TestContainer::with_config(Config::new().maximum_buffer_size(8 * 1024));
        let config = ParallelConfig::default();

        let mut writer = container.session_writer();
        writer.write_session_start().unwrap();
        writer.start_task_storage().unwrap();
        let result = run_parallel_tasks(&mut writer, &config).unwrap();
        writer.stop_task_storage(false).unwrap();
        writer.write_session_completion().unwrap();
        writer.close().unwrap();

        let total = config.workers * config.tasks_per_worker * config.events_per_task;
        assert_eq!(result.merged_tasks, config.workers * config.tasks_per_worker);
        assert_eq!(result.events_written, total);

        let timestamps = container.read_timestamps(None);
        let expected: Vec<i64> = (0..i64::try_from(total).unwrap()).collect();
        assert_eq!(timestamps, expected);
    }
}
