//! `g10-scheduler` provides the small `ThreadPool` the toolchain drivers
//! use for data-parallel work: each translation unit, and each object file
//! handed to the linker, is an isolated task owning its inputs.
//!
//! The design is deliberately simple. A [`ThreadPool`] creates _n_
//! `Worker`s; each `Worker` owns a thread running an asynchronous executor.
//! The pool and the workers communicate over one unbounded multi-producer
//! multi-consumer channel: [`ThreadPool::execute`] sends the `Future`, and
//! whichever worker is idle receives it and spawns it detached on its own
//! executor. Work distribution is not work-stealing; it simply relies on
//! the channel handing futures to idle receivers, which is all a batch
//! toolchain needs.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

use std::{
    cmp,
    future::Future,
    io,
    num::NonZeroUsize,
    pin::Pin,
    thread::{self, JoinHandle},
};

use async_channel::{unbounded, Receiver, SendError, Sender};
use async_executor::Executor;
use futures_lite::future::block_on;

/// A thread pool that executes `Future`s on multiple threads.
///
/// The user doesn't have to care about where their `Future`s are going to
/// be executed, they are just sent where there is idleness: a thread whose
/// executor has no `Future` running at all, or only pending ones.
pub struct ThreadPool<T> {
    _workers: Vec<Worker>,
    sender: Sender<Job<T>>,
}

impl<T> ThreadPool<T>
where
    T: Send + 'static,
{
    /// Create a new pool of threads, of maximum size `desired_pool_size`.
    ///
    /// Threads are created eagerly. They will be ready when the constructor
    /// returns.
    ///
    /// Why `desired_pool_size` rather than an exact `pool_size`? Because
    /// parallelism is a resource: a given machine provides a certain
    /// capacity for it, and host environments such as VMs or container
    /// orchestrators may restrict the amount made available to programs.
    /// Thus, `desired_pool_size` is clamped between 1 and
    /// [`std::thread::available_parallelism`].
    pub fn new(desired_pool_size: NonZeroUsize) -> Result<Self, io::Error> {
        let pool_size = cmp::min(desired_pool_size, thread::available_parallelism()?).get();

        let mut workers = Vec::with_capacity(pool_size);

        let (sender, receiver) = unbounded::<Job<T>>();

        for nth in 0..pool_size {
            workers.push(Worker::new(nth, receiver.clone())?);
        }

        Ok(Self { _workers: workers, sender })
    }

    /// Execute a `Future` onto a thread that can accept it.
    pub fn execute<F>(&self, work: F) -> Result<(), SendError<Job<T>>>
    where
        F: Future<Output = T> + Send + 'static,
    {
        block_on(self.sender.send(Box::pin(work)))
    }
}

/// A `Worker` executes work, aka `Job`.
struct Worker {
    _thread_handle: JoinHandle<()>,
}

/// Type alias for a job, i.e. what a `Worker` will execute.
pub type Job<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

impl Worker {
    fn new<T>(worker_id: usize, receiver: Receiver<Job<T>>) -> Result<Self, io::Error>
    where
        T: Send + 'static,
    {
        let thread_handle = thread::Builder::new()
            .name(format!("{prefix}-worker-{worker_id}", prefix = env!("CARGO_PKG_NAME")))
            .spawn(move || {
                let executor = Executor::new();

                block_on(executor.run(async {
                    while let Ok(received_future) = receiver.recv().await {
                        executor.spawn(received_future).detach();
                    }
                }))
            })?;

        Ok(Self { _thread_handle: thread_handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_is_executed() {
        let pool = ThreadPool::new(NonZeroUsize::new(4).unwrap()).unwrap();
        let (sender, receiver) = unbounded::<usize>();

        for nth in 0..32 {
            let sender = sender.clone();

            pool.execute(async move {
                sender.send(nth * 2).await.expect("the result channel has been closed");
            })
            .unwrap();
        }

        drop(sender);

        let sum: usize = block_on(async {
            let mut sum = 0;

            while let Ok(received) = receiver.recv().await {
                sum += received;
            }

            sum
        });

        assert_eq!(sum, (0..32usize).map(|nth| nth * 2).sum());
    }
}
