//! Fiber management and execution context.
//!
//! A [`Fiber`] is a stackful execution context: an entry closure, a status,
//! an owned stack and a `corosensei` coroutine that switches onto it. Fibers
//! are always handled through `Arc<Fiber>`; whichever collection currently
//! has responsibility for a fiber (a run queue, a wait queue, or the worker
//! that is executing it) holds the strong handle, while the thread-local
//! "current fiber" slot only keeps a raw back-reference.

use crate::error::{FiberError, invariant_violation};
use crate::stack::FiberStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use crossbeam::utils::Backoff;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Once};

/// Boxed entry closure run by a fiber.
pub type Entry = Box<dyn FnOnce() + Send + 'static>;

type FiberCoroutine = Coroutine<(), (), (), FiberStack>;
type FiberYielder = Yielder<(), ()>;

/// Lifecycle status of a fiber.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberState {
    /// Created or reset, never resumed since.
    Init = 0,
    /// Currently running on some thread.
    Exec = 1,
    /// Suspended until something explicitly schedules it again.
    Hold = 2,
    /// Suspended and immediately re-schedulable.
    Ready = 3,
    /// Entry closure returned.
    Term = 4,
    /// Entry closure panicked.
    Except = 5,
}

impl FiberState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => FiberState::Init,
            1 => FiberState::Exec,
            2 => FiberState::Hold,
            3 => FiberState::Ready,
            4 => FiberState::Term,
            _ => FiberState::Except,
        }
    }

    /// Term or Except.
    pub fn is_finished(self) -> bool {
        matches!(self, FiberState::Term | FiberState::Except)
    }

    /// States from which [`Fiber::reset`] is allowed.
    pub fn is_resettable(self) -> bool {
        matches!(self, FiberState::Init | FiberState::Term | FiberState::Except)
    }
}

/// What a fiber is used for, which decides how it returns control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberKind {
    /// Implicit fiber wrapping a thread's own execution context. Has no stack.
    Main,
    /// Scheduling fiber of a use-caller worker. Entered with [`Fiber::call`],
    /// leaves with [`Fiber::back`].
    Scheduling,
    /// Ordinary task fiber. Entered with [`Fiber::swap_in`], leaves with
    /// [`Fiber::swap_out`].
    Task,
}

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);
static LIVE_FIBERS: AtomicU64 = AtomicU64::new(0);

// Raw pointer wrapper; never owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FiberHandle(*const Fiber);

/// Strong owner of a thread's implicit main fiber.
struct ThreadFiber(Option<Arc<Fiber>>);

impl Drop for ThreadFiber {
    fn drop(&mut self) {
        if let Some(main) = self.0.take() {
            let _ = CURRENT_FIBER.try_with(|current| {
                if current.get() == Some(FiberHandle(Arc::as_ptr(&main))) {
                    current.set(None);
                }
            });
        }
    }
}

struct PanicReport {
    location: String,
    backtrace: Backtrace,
}

thread_local! {
    static CURRENT_FIBER: Cell<Option<FiberHandle>> = const { Cell::new(None) };
    static THREAD_FIBER: RefCell<ThreadFiber> = const { RefCell::new(ThreadFiber(None)) };
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

/// A stackful, cooperatively scheduled execution context.
pub struct Fiber {
    id: u64,
    kind: FiberKind,
    state: AtomicU8,
    /// Cleared when a thread starts resuming the fiber, set again once the
    /// fiber's context has been fully saved. Prevents a second thread from
    /// resuming a fiber that published itself (Hold/Ready) but has not
    /// finished switching out yet.
    is_suspended: AtomicBool,
    /// Set while the fiber is being dropped so the trampoline lets the
    /// forced unwind of a suspended stack through.
    unwinding: AtomicBool,
    stack_size: usize,
    /// Only touched by the thread that won the `is_suspended` handshake.
    coroutine: UnsafeCell<Option<FiberCoroutine>>,
    /// Valid while the entry closure is on the stack.
    yielder: AtomicPtr<FiberYielder>,
}

// SAFETY: the coroutine is only accessed by the single thread that currently
// resumes the fiber (enforced by `is_suspended` and the Exec check); every
// other field is atomic or immutable.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    fn raw(kind: FiberKind, stack_size: usize) -> Self {
        LIVE_FIBERS.fetch_add(1, Ordering::Relaxed);
        Fiber {
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            state: AtomicU8::new(FiberState::Init as u8),
            is_suspended: AtomicBool::new(true),
            unwinding: AtomicBool::new(false),
            stack_size,
            coroutine: UnsafeCell::new(None),
            yielder: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Creates a task fiber with a stack of at least `stack_size` bytes.
    ///
    /// Fails only when the stack memory cannot be obtained.
    pub fn new<F>(stack_size: usize, entry: F) -> Result<Arc<Fiber>, FiberError>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::create(stack_size, Box::new(entry), false)
    }

    /// Creates a fiber. With `run_as_caller` the fiber is a scheduling fiber
    /// that replaces the thread's original context: it is entered with
    /// [`call`](Self::call) and returns with [`back`](Self::back).
    pub fn create(
        stack_size: usize,
        entry: Entry,
        run_as_caller: bool,
    ) -> Result<Arc<Fiber>, FiberError> {
        install_panic_hook();

        let stack = FiberStack::allocate(stack_size)?;
        let kind = if run_as_caller {
            FiberKind::Scheduling
        } else {
            FiberKind::Task
        };
        let fiber = Arc::new(Fiber::raw(kind, stack.usable_size()));
        let coroutine = make_coroutine(stack, entry);
        // SAFETY: the fiber has not been shared yet.
        unsafe { *fiber.coroutine.get() = Some(coroutine) };

        tracing::trace!(fiber_id = fiber.id, ?kind, stack_size = fiber.stack_size, "fiber created");
        Ok(fiber)
    }

    /// Returns the fiber running on this thread, creating the implicit main
    /// fiber if the thread has none yet.
    pub fn current() -> Arc<Fiber> {
        if let Some(fiber) = Self::try_current() {
            return fiber;
        }

        let main = Arc::new(Fiber::raw(FiberKind::Main, 0));
        main.set_state(FiberState::Exec);
        main.is_suspended.store(false, Ordering::Relaxed);
        CURRENT_FIBER.set(Some(FiberHandle(Arc::as_ptr(&main))));
        THREAD_FIBER.with(|slot| slot.borrow_mut().0 = Some(main.clone()));
        main
    }

    /// Returns the fiber running on this thread without creating one.
    pub fn try_current() -> Option<Arc<Fiber>> {
        let handle = CURRENT_FIBER.try_with(Cell::get).ok().flatten()?;
        // SAFETY: the current fiber is kept alive either by the thread's
        // main-fiber slot or by the strong handle of whoever resumed it.
        unsafe {
            Arc::increment_strong_count(handle.0);
            Some(Arc::from_raw(handle.0))
        }
    }

    /// Id of the fiber running on this thread, 0 if there is none.
    pub fn current_id() -> u64 {
        Self::with_current(|fiber| fiber.id).unwrap_or(0)
    }

    /// Number of fibers alive in the process.
    pub fn total() -> u64 {
        LIVE_FIBERS.load(Ordering::Relaxed)
    }

    pub(crate) fn with_current<R>(f: impl FnOnce(&Fiber) -> R) -> Option<R> {
        let handle = CURRENT_FIBER.try_with(Cell::get).ok().flatten()?;
        // SAFETY: see `try_current`.
        Some(f(unsafe { &*handle.0 }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> FiberKind {
        self.kind
    }

    pub fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Usable stack size in bytes (0 for a thread's main fiber).
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    fn set_state(&self, state: FiberState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Resumes this task fiber from a worker's scheduling fiber.
    ///
    /// Returns the status the fiber switched out with. Once a fiber parked
    /// itself, another thread may resume it right away, so a later
    /// [`state`](Self::state) read can already reflect that.
    pub fn swap_in(&self) -> FiberState {
        debug_assert_ne!(self.kind, FiberKind::Scheduling, "use `call` for scheduling fibers");
        self.resume()
    }

    /// Resumes this scheduling fiber directly from the thread's original context.
    pub fn call(&self) -> FiberState {
        debug_assert_ne!(self.kind, FiberKind::Task, "use `swap_in` for task fibers");
        self.resume()
    }

    /// Returns control from this task fiber to the scheduling fiber that resumed it.
    pub fn swap_out(&self) {
        self.suspend();
    }

    /// Returns control from this scheduling fiber to the thread's original context.
    pub fn back(&self) {
        self.suspend();
    }

    /// Marks the current fiber Hold and switches out. Something else must
    /// schedule it again.
    pub fn yield_to_hold() {
        Self::yield_with(FiberState::Hold);
    }

    /// Marks the current fiber Ready and switches out; the scheduler
    /// re-enqueues it.
    pub fn yield_to_ready() {
        Self::yield_with(FiberState::Ready);
    }

    fn yield_with(state: FiberState) {
        let Some(handle) = CURRENT_FIBER.get() else {
            invariant_violation("yield called outside of any fiber");
        };
        // SAFETY: the resumer holds a strong handle while we run.
        let fiber = unsafe { &*handle.0 };
        if fiber.state() != FiberState::Exec {
            invariant_violation("yield called on a fiber that is not executing");
        }
        fiber.set_state(state);
        fiber.suspend();
    }

    /// Re-arms a finished (or never started) fiber with a new entry closure,
    /// reusing its stack.
    pub fn reset<F>(&self, entry: F) -> Result<(), FiberError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.reset_boxed(Box::new(entry))
    }

    pub(crate) fn reset_boxed(&self, entry: Entry) -> Result<(), FiberError> {
        let invalid = || FiberError::InvalidState {
            id: self.id,
            state: self.state(),
        };
        if self.kind == FiberKind::Main || !self.state().is_resettable() {
            return Err(invalid());
        }
        // Claim exclusive access for the duration of the reset.
        if self
            .is_suspended
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(invalid());
        }
        if !self.state().is_resettable() {
            self.is_suspended.store(true, Ordering::Release);
            return Err(invalid());
        }

        // SAFETY: the handshake above gives this thread exclusive access.
        let slot = unsafe { &mut *self.coroutine.get() };
        if let Some(mut previous) = slot.take() {
            // A never-started coroutine still owns its entry closure.
            if !previous.done() {
                previous.force_unwind();
            }
            *slot = Some(make_coroutine(previous.into_stack(), entry));
        }
        self.set_state(FiberState::Init);
        self.is_suspended.store(true, Ordering::Release);
        tracing::trace!(fiber_id = self.id, "fiber reset");
        Ok(())
    }

    fn resume(&self) -> FiberState {
        if self.kind == FiberKind::Main {
            invariant_violation("a thread's main fiber cannot be resumed");
        }

        // Wait until a previous switch-out has fully completed.
        let backoff = Backoff::new();
        while !self.is_suspended.load(Ordering::Acquire) {
            backoff.snooze();
        }
        match self.state() {
            FiberState::Exec => invariant_violation("resuming a fiber that is already executing"),
            FiberState::Term | FiberState::Except => {
                invariant_violation("resuming a fiber that already finished")
            }
            _ => {}
        }

        let resumer = Fiber::current();
        resumer.set_state(FiberState::Hold);

        self.is_suspended.store(false, Ordering::Relaxed);
        self.set_state(FiberState::Exec);
        CURRENT_FIBER.set(Some(FiberHandle(self)));

        // SAFETY: `is_suspended` was true and is now false, so no other
        // thread touches the coroutine until we set it back.
        let coroutine = unsafe { &mut *self.coroutine.get() };
        let Some(coroutine) = coroutine.as_mut() else {
            invariant_violation("fiber has no execution context");
        };
        let outcome = coroutine.resume(());

        CURRENT_FIBER.set(Some(FiberHandle(Arc::as_ptr(&resumer))));
        resumer.set_state(FiberState::Exec);

        match outcome {
            CoroutineResult::Yield(()) => {
                // A bare swap_out leaves the status untouched.
                if self.state() == FiberState::Exec {
                    self.set_state(FiberState::Hold);
                }
            }
            CoroutineResult::Return(()) => {
                if !self.state().is_finished() {
                    invariant_violation("fiber trampoline returned without a terminal status");
                }
            }
        }
        let state = self.state();
        self.is_suspended.store(true, Ordering::Release);
        state
    }

    fn suspend(&self) {
        let current = CURRENT_FIBER.get();
        if current != Some(FiberHandle(self)) {
            invariant_violation("only the running fiber can switch itself out");
        }
        let yielder = self.yielder.load(Ordering::Relaxed);
        if yielder.is_null() {
            invariant_violation("fiber has no context to switch back to");
        }
        // SAFETY: the yielder lives on this fiber's stack frame in the
        // trampoline, which is active because we are running on it.
        unsafe { (*yielder).suspend(()) };
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        self.unwinding.store(true, Ordering::Release);
        if let Some(coroutine) = self.coroutine.get_mut().take() {
            if matches!(self.state(), FiberState::Hold | FiberState::Ready) {
                tracing::debug!(
                    fiber_id = self.id,
                    state = ?self.state(),
                    "dropping suspended fiber"
                );
            }
            drop(coroutine);
        }
        LIVE_FIBERS.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

fn make_coroutine(stack: FiberStack, entry: Entry) -> FiberCoroutine {
    Coroutine::with_stack(stack, move |yielder: &FiberYielder, ()| {
        trampoline(yielder, entry)
    })
}

/// First frame on every fiber stack: runs the entry closure inside a panic
/// boundary and records the terminal status.
fn trampoline(yielder: &FiberYielder, entry: Entry) {
    let Some(handle) = CURRENT_FIBER.get() else {
        invariant_violation("fiber entered without being the current fiber");
    };
    // SAFETY: the resumer holds a strong handle for as long as we run, and
    // `Fiber::drop` only unwinds us while the fiber is still allocated.
    let fiber = unsafe { &*handle.0 };
    fiber
        .yielder
        .store(yielder as *const FiberYielder as *mut FiberYielder, Ordering::Relaxed);

    match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(()) => fiber.set_state(FiberState::Term),
        Err(payload) => {
            if fiber.unwinding.load(Ordering::Acquire) {
                panic::resume_unwind(payload);
            }
            fiber.set_state(FiberState::Except);
            let report = LAST_PANIC.with(|slot| slot.borrow_mut().take());
            let (location, backtrace) = match report {
                Some(report) => (report.location, report.backtrace),
                None => ("<unknown>".to_string(), Backtrace::force_capture()),
            };
            tracing::error!(
                fiber_id = fiber.id,
                panic = panic_message(payload.as_ref()),
                %location,
                %backtrace,
                "fiber entry panicked"
            );
        }
    }

    fiber.yielder.store(std::ptr::null_mut(), Ordering::Relaxed);
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Unknown panic"
    }
}

/// Routes panics raised inside task fibers into a thread-local report that
/// the trampoline logs; every other panic goes to the previous hook.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let in_task = Fiber::with_current(|fiber| {
                fiber.kind == FiberKind::Task && !fiber.unwinding.load(Ordering::Relaxed)
            })
            .unwrap_or(false);
            if !in_task {
                previous(info);
                return;
            }
            let report = PanicReport {
                location: info
                    .location()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string()),
                backtrace: Backtrace::force_capture(),
            };
            let _ = LAST_PANIC.try_with(|slot| *slot.borrow_mut() = Some(report));
        }));
    });
}
