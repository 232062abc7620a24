//! Parallel task scheduler.
//!
//! A fixed pool of workers pulls tasks from a shared queue. Tasks
//! discovered while processing (extracted directories, directory
//! children) are submitted back into the same queue. The run is over
//! when the queue is empty and every worker is idle, which is tracked by
//! an in-flight counter: incremented at submit, decremented only after a
//! result's children have been submitted. Decrementing earlier would let
//! the scheduler declare the run finished while children are pending.

use crate::report::{Report, Task, TaskResult};
use crossbeam::channel::unbounded;
use crossbeam::thread;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Processes `root` and every task it transitively spawns, then
    /// returns all collected reports.
    ///
    /// `process` runs on worker threads. Result handling (report
    /// collection, child submission, `on_task_done`) runs on the calling
    /// thread only. Once `cancel` is set, queued tasks are drained
    /// without processing and no new tasks are accepted; tasks in flight
    /// complete normally.
    pub fn process_until_done<P, F>(
        &self,
        root: Task,
        cancel: &AtomicBool,
        process: P,
        mut on_task_done: F,
    ) -> Vec<Report>
    where
        P: Fn(&Task) -> TaskResult + Sync,
        F: FnMut(&Task),
    {
        let (task_tx, task_rx) = unbounded::<Task>();
        let (result_tx, result_rx) = unbounded::<(Task, TaskResult)>();
        let in_flight = AtomicUsize::new(1);
        task_tx.send(root).expect("task queue closed early");

        let mut all_reports = Vec::new();
        let process = &process;
        thread::scope(|s| {
            for _ in 0..self.workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                s.spawn(move |_| {
                    for task in task_rx.iter() {
                        let result = if cancel.load(Ordering::SeqCst) {
                            // Drained, not processed; the empty result
                            // still balances the in-flight counter.
                            TaskResult::new()
                        } else {
                            process(&task)
                        };
                        if result_tx.send((task, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            while in_flight.load(Ordering::SeqCst) > 0 {
                let (task, mut result) = match result_rx.recv() {
                    Ok(delivered) => delivered,
                    Err(_) => break, // all workers gone
                };
                for new_task in result.new_tasks.drain(..) {
                    if !cancel.load(Ordering::SeqCst) {
                        in_flight.fetch_add(1, Ordering::SeqCst);
                        task_tx.send(new_task).expect("task queue closed early");
                    }
                }
                all_reports.append(&mut result.reports);
                on_task_done(&task);
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            drop(task_tx);
        })
        .expect("worker thread panicked");

        all_reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn processes_dynamically_spawned_tasks() {
        // Every task up to depth 3 spawns two children: 1+2+4+8 tasks.
        let counter = AtomicU64::new(0);
        let pool = WorkerPool::new(4);
        let reports = pool.process_until_done(
            Task::new("root", 0),
            &no_cancel(),
            |task| {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut result = TaskResult::new();
                if task.depth < 3 {
                    result.add_new_task(Task::new("child", task.depth + 1));
                    result.add_new_task(Task::new("child", task.depth + 1));
                }
                result
            },
            |_| {},
        );
        assert!(reports.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn collects_reports_from_all_tasks() {
        let pool = WorkerPool::new(2);
        let reports = pool.process_until_done(
            Task::new("root", 0),
            &no_cancel(),
            |task| {
                let mut result = TaskResult::new();
                if task.depth == 0 {
                    for _ in 0..5 {
                        result.add_new_task(Task::new("child", 1));
                    }
                }
                result.add_report(Report::UnknownError {
                    message: format!("depth {}", task.depth),
                });
                result
            },
            |_| {},
        );
        assert_eq!(reports.len(), 6);
    }

    #[test]
    fn single_worker_terminates() {
        let pool = WorkerPool::new(1);
        let done = AtomicU64::new(0);
        pool.process_until_done(
            Task::new("root", 0),
            &no_cancel(),
            |task| {
                let mut result = TaskResult::new();
                if task.depth < 5 {
                    result.add_new_task(Task::new("chain", task.depth + 1));
                }
                result
            },
            |_| {
                done.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(done.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn cancellation_drains_without_processing() {
        let processed = AtomicU64::new(0);
        let pool = WorkerPool::new(2);
        let cancel = AtomicBool::new(true);
        pool.process_until_done(
            Task::new("root", 0),
            &cancel,
            |_| {
                processed.fetch_add(1, Ordering::SeqCst);
                TaskResult::new()
            },
            |_| {},
        );
        assert_eq!(processed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancellation_drops_children() {
        let processed = Mutex::new(Vec::new());
        let pool = WorkerPool::new(1);
        let cancel = AtomicBool::new(false);
        pool.process_until_done(
            Task::new("root", 0),
            &cancel,
            |task| {
                processed.lock().unwrap().push(task.depth);
                // Cancel while the root task is in flight: its children
                // must not be scheduled any more.
                cancel.store(true, Ordering::SeqCst);
                let mut result = TaskResult::new();
                result.add_new_task(Task::new("child", task.depth + 1));
                result
            },
            |_| {},
        );
        assert_eq!(*processed.lock().unwrap(), vec![0]);
    }
}
