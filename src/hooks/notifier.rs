use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::DvrError;

use super::{CallbackSink, HookTable, NotifyJob};

/// Background delivery of callback jobs.
///
/// `execute` only enqueues and never blocks the caller. Jobs are delivered in
/// submission order by a single worker task; a failing job is logged and does
/// not affect the ones after it.
#[derive(Clone)]
pub struct AsyncNotifier {
    inner: Arc<Inner>,
}

struct Inner {
    sender: Mutex<Option<mpsc::UnboundedSender<NotifyJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    hooks: Arc<RwLock<HookTable>>,
    sink: Arc<dyn CallbackSink>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AsyncNotifier {
    pub fn new(hooks: HookTable, sink: Arc<dyn CallbackSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(None),
                worker: Mutex::new(None),
                hooks: Arc::new(RwLock::new(hooks)),
                sink,
            }),
        }
    }

    /// Spawns the worker on the current tokio runtime.
    pub fn start(&self) -> Result<(), DvrError> {
        let mut sender = lock(&self.inner.sender);
        if sender.is_some() {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|_| DvrError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = NotifyWorker {
            receiver: rx,
            hooks: Arc::clone(&self.inner.hooks),
            sink: Arc::clone(&self.inner.sink),
        };
        *lock(&self.inner.worker) = Some(runtime.spawn(worker.run()));
        *sender = Some(tx);
        tracing::debug!("notify worker started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.sender).is_some()
    }

    pub fn execute(&self, job: NotifyJob) -> Result<(), DvrError> {
        let sender = lock(&self.inner.sender);
        let sender = sender.as_ref().ok_or(DvrError::WorkerNotRunning)?;
        sender.send(job).map_err(|_| DvrError::WorkerNotRunning)
    }

    pub fn reload(&self, hooks: HookTable) {
        *self
            .inner
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hooks;
    }

    /// Stops accepting jobs and waits for the queue to drain.
    pub async fn shutdown(&self) {
        let sender = lock(&self.inner.sender).take();
        drop(sender);
        let worker = lock(&self.inner.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("notify worker failed: {}", e);
            }
        }
    }
}

struct NotifyWorker {
    receiver: mpsc::UnboundedReceiver<NotifyJob>,
    hooks: Arc<RwLock<HookTable>>,
    sink: Arc<dyn CallbackSink>,
}

impl NotifyWorker {
    async fn run(self) {
        let NotifyWorker {
            mut receiver,
            hooks,
            sink,
        } = self;
        while let Some(job) = receiver.recv().await {
            deliver(&hooks, sink.as_ref(), &job).await;
        }
        tracing::debug!("notify worker shutting down");
    }
}

fn endpoints(hooks: &RwLock<HookTable>, job: &NotifyJob) -> Option<(Vec<String>, Duration)> {
    hooks
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .endpoints(&job.request.vhost, &job.event)
}

async fn deliver(hooks: &RwLock<HookTable>, sink: &dyn CallbackSink, job: &NotifyJob) {
    let Some((urls, timeout)) = endpoints(hooks, job) else {
        return;
    };
    for url in &urls {
        if let Err(e) = sink.invoke(url, job, timeout).await {
            tracing::error!(
                stream = %job.request,
                action = job.event.action(),
                url = %url,
                error = %e,
                "callback failed"
            );
            return;
        }
        tracing::debug!(stream = %job.request, action = job.event.action(), url = %url, "callback done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hooks::HookError;
    use crate::request::StreamRequest;
    use async_trait::async_trait;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl CallbackSink for RecordingSink {
        async fn invoke(&self, url: &str, job: &NotifyJob, _timeout: Duration) -> Result<(), HookError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), job.request.stream.clone()));
            if job.request.stream == "bad" {
                return Err(HookError::Rejected {
                    url: url.to_string(),
                    code: 500,
                });
            }
            Ok(())
        }
    }

    fn hooks() -> HookTable {
        let config = Config::parse(
            r#"
[[vhosts]]
name = "__defaultVhost__"
[vhosts.http_hooks]
enabled = true
on_dvr = ["http://a/dvr", "http://b/dvr"]
"#,
        )
        .unwrap();
        HookTable::from_config(&config)
    }

    fn job(stream: &str) -> NotifyJob {
        NotifyJob::dvr(
            StreamRequest::new("v", "live", stream),
            PathBuf::from(format!("/data/{stream}.flv")),
        )
    }

    #[test]
    fn test_execute_requires_worker() {
        let notifier = AsyncNotifier::new(hooks(), Arc::new(RecordingSink::default()));
        assert!(matches!(notifier.execute(job("a")), Err(DvrError::WorkerNotRunning)));
        assert!(matches!(notifier.start(), Err(DvrError::NoRuntime)));
        assert!(!notifier.is_running());
    }

    #[tokio::test]
    async fn test_failed_job_does_not_block_later_jobs() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = AsyncNotifier::new(hooks(), sink.clone());
        notifier.start().unwrap();
        assert!(notifier.is_running());

        notifier.execute(job("one")).unwrap();
        notifier.execute(job("bad")).unwrap();
        notifier.execute(job("three")).unwrap();
        notifier.shutdown().await;

        let calls = sink.calls.lock().unwrap().clone();
        let expected: Vec<(String, String)> = [
            ("http://a/dvr", "one"),
            ("http://b/dvr", "one"),
            ("http://a/dvr", "bad"),
            ("http://a/dvr", "three"),
            ("http://b/dvr", "three"),
        ]
        .iter()
        .map(|(u, s)| (u.to_string(), s.to_string()))
        .collect();
        assert_eq!(calls, expected);
        assert!(matches!(notifier.execute(job("late")), Err(DvrError::WorkerNotRunning)));
    }

    #[tokio::test]
    async fn test_reload_applies_to_queued_jobs() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = AsyncNotifier::new(HookTable::default(), sink.clone());
        notifier.start().unwrap();
        notifier.reload(hooks());
        notifier.execute(job("one")).unwrap();
        notifier.shutdown().await;
        assert_eq!(sink.calls.lock().unwrap().len(), 2);
    }
}
