use std::panic::Location;
use std::sync::{
    Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;

// Poisoned locks are logged and their guards recovered.

#[track_caller]
fn report<T>(err: &PoisonError<T>, context: &'static str) {
    let loc = Location::caller();
    tracing::error!(
        target: crate::TRACE_TARGET,
        context,
        file = loc.file(),
        line = loc.line(),
        error = %err,
        "lock poisoned; continuing with recovered guard"
    );
}

#[track_caller]
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => {
            report(&err, context);
            err.into_inner()
        }
    }
}

#[track_caller]
pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, context: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(err) => {
            report(&err, context);
            err.into_inner()
        }
    }
}

#[track_caller]
pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, context: &'static str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(err) => {
            report(&err, context);
            err.into_inner()
        }
    }
}

#[track_caller]
pub(crate) fn wait_timeout<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
    context: &'static str,
) -> MutexGuard<'a, T> {
    match condvar.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(err) => {
            report(&err, context);
            err.into_inner().0
        }
    }
}
