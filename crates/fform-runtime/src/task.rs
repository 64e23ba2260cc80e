#![forbid(unsafe_code)]

//! Where a form's deferred work runs.
//!
//! By default every form owns a single-threaded [`LocalPool`] and the host
//! drives it with [`Form::run_until_stalled`](crate::Form::run_until_stalled).
//! A host with its own executor passes a [`LocalSpawn`] instead and the pool
//! is never created.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures::executor::LocalPool;
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use tracing::warn;

use crate::config::CallbackScheduler;

pub(crate) struct TaskHost {
    pool: Option<RefCell<LocalPool>>,
    spawner: Rc<dyn LocalSpawn>,
}

impl TaskHost {
    pub(crate) fn new(spawner: Option<Rc<dyn LocalSpawn>>) -> Self {
        match spawner {
            Some(spawner) => Self {
                pool: None,
                spawner,
            },
            None => {
                let pool = LocalPool::new();
                let spawner: Rc<dyn LocalSpawn> = Rc::new(pool.spawner());
                Self {
                    pool: Some(RefCell::new(pool)),
                    spawner,
                }
            }
        }
    }

    pub(crate) fn spawner(&self) -> Rc<dyn LocalSpawn> {
        Rc::clone(&self.spawner)
    }

    pub(crate) fn spawn(&self, future: impl Future<Output = ()> + 'static) -> Result<(), SpawnError> {
        self.spawner
            .spawn_local_obj(LocalFutureObj::new(Box::pin(future)))
    }

    /// Run the owned pool until no task can make progress.
    ///
    /// Returns `false` without doing anything when the form uses a host
    /// spawner or when called from inside one of the pool's own tasks.
    pub(crate) fn run_until_stalled(&self) -> bool {
        let Some(pool) = &self.pool else {
            return false;
        };
        let Ok(mut pool) = pool.try_borrow_mut() else {
            return false;
        };
        pool.run_until_stalled();
        true
    }
}

/// Runs each scheduled batch as a task on `spawner`, i.e. on the next
/// executor turn.
pub(crate) fn default_scheduler(spawner: Rc<dyn LocalSpawn>) -> CallbackScheduler {
    Rc::new(move |callback: Box<dyn FnOnce()>| {
        let task = LocalFutureObj::new(Box::pin(async move { callback() }));
        if let Err(err) = spawner.spawn_local_obj(task) {
            warn!(error = %err, "could not schedule deferred notifications");
        }
    })
}
