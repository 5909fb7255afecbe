//! Value freezing.
//!
//! A frozen address is rewritten on a fixed interval by a dedicated worker
//! thread until it is cancelled. One worker per address; refreezing an
//! address replaces its worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::access;
use crate::address::Address;
use crate::error::{Error, Result};
use crate::target::TargetMemory;
use crate::value::Value;

/// A cancellation flag with interruptible waits.
///
/// Unlike `thread::sleep()`, waits on this token return immediately when the
/// token is cancelled, so unfreezing never blocks on a sleeping worker.
pub struct CancelToken {
    cancelled: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    /// Cancel the token, waking all waiting threads.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait for the given duration or until cancelled.
    ///
    /// Returns `true` if the token was cancelled, `false` on a normal timeout.
    pub fn wait(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }

        let guard = self.mutex.lock();
        let result = match guard {
            Ok(guard) => self
                .condvar
                .wait_timeout_while(guard, duration, |_| !self.is_cancelled()),
            // Mutex poisoned, treat as cancelled.
            Err(_) => return true,
        };

        match result {
            Ok((_, timeout)) => !timeout.timed_out(),
            Err(_) => true,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Background rewrite loops keyed by address.
pub struct FreezeScheduler<T: TargetMemory + Send + Sync + 'static> {
    target: Arc<T>,
    entries: Mutex<HashMap<u64, Arc<CancelToken>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: TargetMemory + Send + Sync + 'static> FreezeScheduler<T> {
    pub fn new(target: Arc<T>) -> Self {
        FreezeScheduler {
            target,
            entries: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start (or replace) a rewrite loop that pins `value` at `address` every
    /// `interval`. The first write happens immediately.
    pub fn freeze(&self, address: Address, value: Value, interval: Duration) -> Result<()> {
        if !address.is_valid() {
            return Err(Error::InvalidAddress(address.get()));
        }

        let token = Arc::new(CancelToken::new());
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(previous) = entries.insert(address.get(), Arc::clone(&token)) {
                previous.cancel();
                info!(address = %address, "changing frozen value");
            } else {
                debug!(address = %address, "freezing value");
            }
        }

        let target = Arc::clone(&self.target);
        let worker_token = Arc::clone(&token);
        let handle = thread::spawn(move || loop {
            if worker_token.is_cancelled() {
                break;
            }
            if let Err(e) = access::write_value(&*target, address, &value, true) {
                warn!(address = %address, "freeze write failed: {e}");
            }
            if worker_token.wait(interval) {
                break;
            }
        });
        let mut workers = self.workers.lock().unwrap();
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);

        Ok(())
    }

    /// Stop the rewrite loop for `address`. Unknown addresses are a no-op.
    pub fn unfreeze(&self, address: Address) {
        let token = self.entries.lock().unwrap().remove(&address.get());
        match token {
            Some(token) => {
                token.cancel();
                debug!(address = %address, "unfroze value");
            }
            None => debug!(address = %address, "address was not frozen"),
        }
    }

    pub fn is_frozen(&self, address: Address) -> bool {
        self.entries.lock().unwrap().contains_key(&address.get())
    }

    pub fn frozen_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Cancel every loop and join the workers.
    pub fn shutdown(&self) {
        let tokens: Vec<_> = self.entries.lock().unwrap().drain().collect();
        for (_, token) in tokens {
            token.cancel();
        }
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl<T: TargetMemory + Send + Sync + 'static> Drop for FreezeScheduler<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MockTarget;
    use std::time::Instant;

    const TICK: Duration = Duration::from_millis(5);

    #[test]
    fn token_wait_times_out() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.wait(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn token_cancel_interrupts_wait() {
        let token = Arc::new(CancelToken::new());
        let waiter = Arc::clone(&token);
        let handle = thread::spawn(move || waiter.wait(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(50));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn rejects_invalid_address() {
        let scheduler = FreezeScheduler::new(Arc::new(MockTarget::builder().build()));
        let err = scheduler
            .freeze(Address::new(0xFFFF), Value::Int32(1), TICK)
            .unwrap_err();
        assert!(err.is_invalid_address());
        assert_eq!(scheduler.frozen_count(), 0);
    }

    #[test]
    fn freeze_rewrites_until_unfrozen() {
        let target = Arc::new(MockTarget::builder().build());
        let scheduler = FreezeScheduler::new(Arc::clone(&target));
        let addr = Address::new(0x20000);

        scheduler.freeze(addr, Value::Int32(42), TICK).unwrap();
        assert!(scheduler.is_frozen(addr));
        thread::sleep(Duration::from_millis(60));
        assert!(target.write_log().len() >= 2);

        scheduler.unfreeze(addr);
        assert!(!scheduler.is_frozen(addr));
        // Let any in-flight iteration finish, then verify the loop stopped.
        thread::sleep(Duration::from_millis(30));
        let settled = target.write_log().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(target.write_log().len(), settled);
    }

    #[test]
    fn refreeze_replaces_the_value() {
        let target = Arc::new(MockTarget::builder().build());
        let scheduler = FreezeScheduler::new(Arc::clone(&target));
        let addr = Address::new(0x20000);

        scheduler.freeze(addr, Value::Int32(1), TICK).unwrap();
        thread::sleep(Duration::from_millis(30));
        scheduler.freeze(addr, Value::Int32(2), TICK).unwrap();
        assert_eq!(scheduler.frozen_count(), 1);
        target.clear_write_log();
        thread::sleep(Duration::from_millis(60));

        // After the old worker drains, only the new value is written.
        let log = target.write_log();
        assert!(!log.is_empty());
        let last = log.last().unwrap();
        assert_eq!(last.1, 2i32.to_le_bytes().to_vec());

        scheduler.shutdown();
    }

    #[test]
    fn unfreeze_unknown_address_is_a_no_op() {
        let scheduler = FreezeScheduler::new(Arc::new(MockTarget::builder().build()));
        scheduler.unfreeze(Address::new(0x20000));
        assert_eq!(scheduler.frozen_count(), 0);
    }

    #[test]
    fn finished_workers_are_reaped_on_freeze() {
        let target = Arc::new(MockTarget::builder().build());
        let scheduler = FreezeScheduler::new(Arc::clone(&target));
        let addr = Address::new(0x20000);

        scheduler.freeze(addr, Value::Byte(1), TICK).unwrap();
        scheduler.unfreeze(addr);
        // Give the cancelled worker time to exit.
        thread::sleep(Duration::from_millis(50));

        scheduler.freeze(addr, Value::Byte(2), TICK).unwrap();
        assert_eq!(scheduler.workers.lock().unwrap().len(), 1);

        scheduler.shutdown();
    }

    #[test]
    fn shutdown_stops_all_workers() {
        let target = Arc::new(MockTarget::builder().build());
        let scheduler = FreezeScheduler::new(Arc::clone(&target));
        scheduler
            .freeze(Address::new(0x20000), Value::Byte(1), TICK)
            .unwrap();
        scheduler
            .freeze(Address::new(0x30000), Value::Byte(2), TICK)
            .unwrap();

        scheduler.shutdown();
        assert_eq!(scheduler.frozen_count(), 0);
        let settled = target.write_log().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(target.write_log().len(), settled);
    }
}
