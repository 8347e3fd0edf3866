use std::{
    any::Any,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::Arc,
};

use crate::common::entry::SlotGuard;

/// How many times a lookup may find an entry abandoned by a panicked loader
/// before giving up.
pub(crate) const MAX_RETRIES: usize = 200;

pub(crate) enum InitResult<V, E> {
    Initialized(V),
    InitErr(Arc<E>),
}

/// Evaluates `init` for an entry this caller reserved, stores the result in the
/// slot and releases the entry lock.
///
/// # Panics
/// If `init` panics, the slot is left unfilled, the entry lock is released, and
/// `on_panic` is called before the panic is resumed.
pub(crate) fn init_slot<V, E>(
    mut guard: SlotGuard<V, E>,
    init: impl FnOnce() -> Result<V, E>,
    on_panic: impl FnOnce(&(dyn Any + Send + 'static)),
) -> InitResult<V, E>
where
    V: Clone,
{
    // Catching panic is safe here as `init` is never evaluated again.
    match catch_unwind(AssertUnwindSafe(init)) {
        Ok(Ok(value)) => {
            *guard = Some(Ok(value.clone()));
            InitResult::Initialized(value)
        }
        Ok(Err(e)) => {
            let e = Arc::new(e);
            *guard = Some(Err(Arc::clone(&e)));
            InitResult::InitErr(e)
        }
        Err(payload) => {
            // Unblock the waiters first. They will find the slot unfilled and
            // retry.
            std::mem::drop(guard);
            on_panic(&*payload);
            resume_unwind(payload);
        }
    }
}

/// # Panics
/// Panics when `retries` has reached [`MAX_RETRIES`].
pub(crate) fn ensure_retries(retries: usize) {
    if retries >= MAX_RETRIES {
        panic!(
            "Too many retries. Tried to read the return value from the loader \
            but failed {retries} times. Maybe the loader kept panicking?"
        );
    }
}

#[cfg(feature = "logging")]
pub(crate) fn log_panic(payload: &(dyn Any + Send + 'static), cache_name: Option<&str>) {
    // Try to downcast the payload into &str or String.
    let message: Option<std::borrow::Cow<'_, str>> =
        (payload.downcast_ref::<&str>().map(|s| (*s).into()))
            .or_else(|| payload.downcast_ref::<String>().map(Into::into));

    let cn = crate::common::log_prefix(cache_name);

    if let Some(m) = message {
        log::error!("{cn}Removed an entry because its loader panicked at '{m}'");
    } else {
        log::error!("{cn}Removed an entry because its loader panicked");
    }
}
