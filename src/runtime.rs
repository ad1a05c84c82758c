// Async runtime module
// Owns the tokio runtime the task pool dispatches slice renders on.

use std::time::Duration;
use tokio::runtime::{Builder, Runtime as TokioRuntime};

/// Builder for the worker runtime.
pub struct RuntimeBuilder {
    // Number of async worker threads. Defaults to the number of CPU cores.
    worker_threads: Option<usize>,
    // Upper bound for blocking threads, which is where slice renders run.
    max_blocking_threads: Option<usize>,
    thread_name: String,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            worker_threads: None,
            max_blocking_threads: None,
            thread_name: "slicecache-worker".to_string(),
        }
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }

    pub fn max_blocking_threads(mut self, threads: usize) -> Self {
        self.max_blocking_threads = Some(threads.max(1));
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn build(self) -> Result<Runtime, std::io::Error> {
        let mut builder = Builder::new_multi_thread();

        if let Some(threads) = self.worker_threads {
            builder.worker_threads(threads);
        }
        if let Some(threads) = self.max_blocking_threads {
            builder.max_blocking_threads(threads);
        }
        builder.thread_name(self.thread_name);
        builder.enable_all();

        let runtime = builder.build()?;
        Ok(Runtime { runtime: Some(runtime) })
    }
}

/// Multi-threaded runtime wrapper.
pub struct Runtime {
    // Taken on shutdown so Drop never blocks inside an async context.
    runtime: Option<TokioRuntime>,
}

impl Runtime {
    pub fn new() -> Result<Self, std::io::Error> {
        RuntimeBuilder::new().build()
    }

    pub fn with_worker_threads(threads: usize) -> Result<Self, std::io::Error> {
        RuntimeBuilder::new().worker_threads(threads).build()
    }

    pub fn handle(&self) -> Option<tokio::runtime::Handle> {
        self.runtime.as_ref().map(|rt| rt.handle().clone())
    }

    /// Run a future to completion, blocking the current thread.
    pub fn block_on<F, T>(&self, future: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        self.runtime.as_ref().map(|rt| rt.block_on(future))
    }

    pub fn spawn<F>(&self, future: F) -> Option<tokio::task::JoinHandle<F::Output>>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.as_ref().map(|rt| rt.spawn(future))
    }

    /// Stop accepting work and give running tasks `timeout` to finish.
    pub fn shutdown(&mut self, timeout: Duration) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(timeout);
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_with_threads() {
        let runtime = Runtime::with_worker_threads(2).expect("Failed to create runtime with threads");
        assert!(runtime.handle().is_some());
    }

    #[test]
    fn test_block_on() {
        let runtime = RuntimeBuilder::new().thread_name("test-rt").build().expect("Failed to create runtime");
        assert_eq!(runtime.block_on(async { 42 }), Some(42));
    }

    #[test]
    fn test_spawn_blocking_inside_runtime() {
        let runtime = Runtime::new().expect("Failed to create runtime");
        let result = runtime.block_on(async { tokio::task::spawn_blocking(|| 7).await.expect("Task failed") });
        assert_eq!(result, Some(7));
    }

    #[test]
    fn test_shutdown_disables_runtime() {
        let mut runtime = Runtime::new().expect("Failed to create runtime");
        runtime.shutdown(Duration::from_millis(100));
        assert!(runtime.handle().is_none());
        assert!(runtime.spawn(async {}).is_none());
    }
}
