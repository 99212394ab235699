//! Process-wide message thread.
//!
//! Plugin SDKs require instantiation and final destruction to happen on a
//! single "UI" thread. The core runs one such thread per process and funnels
//! those calls through it: [`MessageThread::run_sync`] for synchronous
//! cross-thread calls, [`MessageThread::post`] for fire-and-forget work such
//! as deferred plugin destruction.

use crossbeam_channel::{bounded, unbounded, Sender};
use std::sync::OnceLock;
use std::thread::{self, ThreadId};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct MessageThread {
    tx: Sender<Task>,
    thread_id: ThreadId,
}

static GLOBAL: OnceLock<MessageThread> = OnceLock::new();

impl MessageThread {
    /// The process-wide instance, spawned on first use.
    pub fn global() -> &'static MessageThread {
        GLOBAL.get_or_init(|| {
            let (tx, rx) = unbounded::<Task>();
            let handle = thread::Builder::new()
                .name("plugrid-message".to_string())
                .spawn(move || {
                    for task in rx {
                        task();
                    }
                })
                .expect("BUG: failed to spawn the message thread");
            MessageThread {
                tx,
                thread_id: handle.thread().id(),
            }
        })
    }

    /// Run `f` on the message thread and block until it returns. Calls made
    /// from the message thread itself run inline.
    pub fn run_sync<R, F>(&self, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if thread::current().id() == self.thread_id {
            return f();
        }
        let (done_tx, done_rx) = bounded(1);
        self.send(Box::new(move || {
            let _ = done_tx.send(f());
        }));
        done_rx
            .recv()
            .expect("BUG: message thread dropped a synchronous task")
    }

    /// Queue `f` on the message thread without waiting for it.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Box::new(f));
    }

    fn send(&self, task: Task) {
        // The receiver lives for the process; send only fails after that.
        self.tx
            .send(task)
            .expect("BUG: message thread terminated");
    }
}
