// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    future::Future,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_utils::sync::{Parker, Unparker};
use reqstats_core::IncomingRequest;

use crate::Engine;

/// Runs [`Engine::merge_now`] on a background thread every
/// [`merge_interval_ms`](crate::EngineConfig::merge_interval_ms).
///
/// Cloning is cheap and all clones drive the same thread. The thread stops once the
/// [`DriverJoinHandle`] is dropped, or once every `Driver` is gone if the handle was
/// [forgotten](DriverJoinHandle::forget). Either way it merges one last time before exiting, so
/// nothing submitted before shutdown is lost.
#[derive(Clone, Debug)]
pub struct Driver {
    engine: Arc<Engine>,
    shared: Arc<Shared>,
}

struct FlushSignal {
    // dropped once a merge covering everything submitted before the flush has finished
    #[allow(unused)]
    channel: tokio::sync::oneshot::Sender<()>,
}

#[derive(Debug)]
struct Shared {
    flush_sender: mpsc::Sender<FlushSignal>,
    unparker: Unparker,
}

/// Guard that stops the driver thread when dropped, after a final merge.
#[derive(Debug)]
pub struct DriverJoinHandle {
    handle: Option<thread::JoinHandle<()>>,
    shutdown_signal: Arc<AtomicBool>,
    unparker: Unparker,
}

impl Driver {
    /// Spawn the driver thread for `engine`, named after
    /// [`driver_thread_name`](crate::EngineConfig::driver_thread_name).
    pub fn start(engine: Arc<Engine>) -> io::Result<(Driver, DriverJoinHandle)> {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let (flush_sender, flush_receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            flush_sender,
            unparker: unparker.clone(),
        });
        let shutdown_signal = Arc::new(AtomicBool::new(false));

        let runner = Runner {
            engine: Arc::clone(&engine),
            shared: Arc::clone(&shared),
            interval: engine.config().merge_period(),
            shutdown_signal: Arc::clone(&shutdown_signal),
            flush_receiver,
            parker,
        };
        let handle = thread::Builder::new()
            .name(engine.config().driver_thread_name.clone())
            .spawn(move || runner.run())?;

        Ok((
            Driver { engine, shared },
            DriverJoinHandle {
                handle: Some(handle),
                shutdown_signal,
                unparker,
            },
        ))
    }

    /// The driven engine.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Shorthand for [`Engine::submit`].
    pub fn submit(&self, request: IncomingRequest) {
        self.engine.submit(request);
    }

    fn request_flush(&self) -> tokio::sync::oneshot::Receiver<()> {
        let (channel, receiver) = tokio::sync::oneshot::channel();
        // if the thread is gone the signal is dropped right here, which resolves the receiver
        self.shared.flush_sender.send(FlushSignal { channel }).ok();
        self.shared.unparker.unpark();
        receiver
    }

    /// Block until everything submitted so far has been merged.
    ///
    /// # Panics
    ///
    /// When called from within an async runtime; use [`Driver::flush_async`] there.
    pub fn flush(&self) {
        let _ = self.request_flush().blocking_recv();
    }

    /// Resolves once everything submitted before the call has been merged.
    pub fn flush_async(&self) -> impl Future<Output = ()> + Send + 'static {
        let receiver = self.request_flush();
        async move {
            let _ = receiver.await;
        }
    }
}

impl DriverJoinHandle {
    /// Drop the handle but let the thread keep running until no [`Driver`]s exist.
    pub fn forget(mut self) {
        self.handle = None;
    }

    /// Alias for `drop(handle)`: merge what is staged, then stop the thread.
    pub fn shut_down(self) {}
}

impl Drop for DriverJoinHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown_signal.store(true, Ordering::Relaxed);
            self.unparker.unpark();
            tracing::info!("awaiting merge driver shutdown");
            if handle.join().is_err() {
                tracing::error!("merge driver thread panicked");
                return;
            }
            tracing::info!("merge driver shut down");
        }
    }
}

struct Runner {
    engine: Arc<Engine>,
    shared: Arc<Shared>,
    interval: Duration,
    shutdown_signal: Arc<AtomicBool>,
    flush_receiver: mpsc::Receiver<FlushSignal>,
    parker: Parker,
}

impl Runner {
    fn run(mut self) {
        let span = tracing::span!(
            tracing::Level::TRACE,
            "merge driver",
            interval = ?self.interval
        );
        let _enter = span.enter();

        loop {
            let next_merge = Instant::now() + self.interval;
            self.merge();

            if self.shutdown_signal.load(Ordering::Relaxed) {
                tracing::info!("caught shutdown signal, shutting down merge driver");
                break;
            }
            if Arc::get_mut(&mut self.shared).is_some() {
                tracing::info!("no drivers left, shutting down merge driver");
                break;
            }
            self.parker.park_deadline(next_merge);
        }
        // anything staged between the last merge and the shutdown signal
        self.merge();
    }

    fn merge(&self) {
        // only signals that arrived before the merge starts are covered by it
        let waiting: Vec<FlushSignal> = self.flush_receiver.try_iter().collect();
        let summary = self.engine.merge_now();
        if !waiting.is_empty() {
            tracing::debug!(flushes = waiting.len(), ?summary, "flushed");
        }
        drop(waiting);
    }
}
