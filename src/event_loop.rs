use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use slab::Slab;

use crate::delay_queue::DelayQueue;
use crate::epoll::{Epoll, EpollOpt, Events, Ready, Token as EpollToken};
use crate::error::{CoreError, CoreResult};
use crate::task::Task;
use crate::task_queue::TaskQueue;
use crate::token::{next_loop_id, Token, TokenRegistry};
use crate::waker::Waker;

const WAKER_TOKEN: EpollToken = EpollToken(usize::MAX);
const DEFAULT_EVENTS_CAPACITY: usize = 1024;

type Callback = Arc<Mutex<Box<dyn FnMut(Ready) + Send>>>;

struct Registration {
    fd: RawFd,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    slab: Slab<Registration>,
    fd_index: HashMap<RawFd, usize>,
}

/// A descriptor registration handle returned by [`EventLoop::register`].
///
/// Opaque to callers; pass it back unchanged to [`EventLoop::update`] and
/// [`EventLoop::unregister`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegistrationId(usize);

/// Single-threaded, poll-driven event loop.
///
/// Exactly one thread may call [`EventLoop::run`] at a time; every other
/// operation (`post`, `cancel`, `register`, ...) may be called from any
/// thread and is safe to call concurrently with a running loop.
/// Parallelism is achieved by running one `EventLoop` per thread, not by
/// sharing a single loop across threads.
pub struct EventLoop {
    id: u64,
    epoll: Epoll,
    events: Mutex<Events>,
    waker: Waker,
    registry: Mutex<Registry>,
    tasks: TaskQueue,
    delayed: DelayQueue,
    tokens: TokenRegistry,
    stopped: AtomicBool,
    loop_thread: Mutex<Option<ThreadId>>,
    executing: Mutex<Option<Token>>,
    executing_done: Condvar,
    #[cfg(feature = "stats")]
    stats: Stats,
}

#[cfg(feature = "stats")]
#[derive(Default)]
struct Stats {
    dispatched: std::sync::atomic::AtomicU64,
    cancelled: std::sync::atomic::AtomicU64,
}

impl EventLoop {
    pub fn new() -> std::io::Result<EventLoop> {
        let id = next_loop_id();
        let epoll = Epoll::new()?;
        let waker = Waker::new()?;
        epoll.add(&waker, WAKER_TOKEN, Ready::readable(), EpollOpt::edge())?;

        Ok(EventLoop {
            id,
            epoll,
            events: Mutex::new(Events::with_capacity(DEFAULT_EVENTS_CAPACITY)),
            waker,
            registry: Mutex::new(Registry::default()),
            tasks: TaskQueue::new(),
            delayed: DelayQueue::new(),
            tokens: TokenRegistry::new(id),
            stopped: AtomicBool::new(false),
            loop_thread: Mutex::new(None),
            executing: Mutex::new(None),
            executing_done: Condvar::new(),
            #[cfg(feature = "stats")]
            stats: Stats::default(),
        })
    }

    /// Creates a new cancellation token bound to this loop.
    pub fn create_token(&self) -> Token {
        self.tokens.create()
    }

    // ---- descriptor registration (C1/C3) ----

    pub fn register(
        &self,
        fd: RawFd,
        interest: Ready,
        callback: Box<dyn FnMut(Ready) + Send>,
    ) -> CoreResult<RegistrationId> {
        let callback: Callback = Arc::new(Mutex::new(callback));
        let mut registry = self.registry.lock().unwrap();
        if registry.fd_index.contains_key(&fd) {
            return Err(CoreError::InvalidParam);
        }
        let key = registry.slab.insert(Registration { fd, callback });
        registry.fd_index.insert(fd, key);
        drop(registry);

        if let Err(e) = self
            .epoll
            .add(&fd, EpollToken(key), interest, EpollOpt::edge())
        {
            let mut registry = self.registry.lock().unwrap();
            registry.slab.remove(key);
            registry.fd_index.remove(&fd);
            return Err(CoreError::from(e));
        }

        trace!("registered fd {} as {:?}", fd, key);
        Ok(RegistrationId(key))
    }

    pub fn update(&self, id: RegistrationId, interest: Ready) -> CoreResult<()> {
        let registry = self.registry.lock().unwrap();
        let reg = registry
            .slab
            .get(id.0)
            .ok_or(CoreError::InvalidParam)?;
        let fd = reg.fd;
        drop(registry);

        self.epoll
            .modify(&fd, EpollToken(id.0), interest, EpollOpt::edge())
            .map_err(CoreError::from)
    }

    pub fn unregister(&self, id: RegistrationId, close: bool) -> CoreResult<()> {
        let mut registry = self.registry.lock().unwrap();
        let reg = registry.slab.try_remove(id.0).ok_or(CoreError::InvalidParam)?;
        registry.fd_index.remove(&reg.fd);
        drop(registry);

        self.epoll.delete(&reg.fd).map_err(CoreError::from)?;
        if close {
            unsafe {
                libc::close(reg.fd);
            }
        }
        Ok(())
    }

    // ---- cross-thread task submission (C2/C4) ----

    pub fn post(&self, f: impl FnOnce() + Send + 'static) -> CoreResult<()> {
        self.post_with(None, None, f)
    }

    pub fn post_token(
        &self,
        token: &Token,
        f: impl FnOnce() + Send + 'static,
    ) -> CoreResult<()> {
        token.check_owner(self.id)?;
        let cancel = (token.clone(), token.generation());
        self.post_with(Some(cancel), None, f)
    }

    /// Identical to [`EventLoop::post`]. Kept as a distinct entry point
    /// because `async` is a reserved keyword in callers migrating from
    /// languages where the underlying operation is named that way.
    pub fn async_(&self, f: impl FnOnce() + Send + 'static) -> CoreResult<()> {
        self.post(f)
    }

    fn post_with(
        &self,
        cancel: Option<crate::task::Cancellation>,
        label: Option<&'static str>,
        f: impl FnOnce() + Send + 'static,
    ) -> CoreResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(CoreError::InvalidState);
        }
        if !self.tasks.push(Task::new(Box::new(f), cancel, label)) {
            // The queue was closed by a concurrent `stop()` between the
            // check above and this push; the task was dropped.
            return Err(CoreError::InvalidState);
        }
        self.waker.wakeup().map_err(CoreError::from)
    }

    pub fn post_delayed(
        &self,
        delay: Duration,
        token: Option<&Token>,
        f: impl FnOnce() + Send + 'static,
    ) -> CoreResult<Instant> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(CoreError::InvalidState);
        }
        let cancel = match token {
            Some(t) => {
                t.check_owner(self.id)?;
                Some((t.clone(), t.generation()))
            }
            None => None,
        };
        let deadline = self
            .delayed
            .insert(Task::new(Box::new(f), cancel, None), delay);
        self.waker.wakeup().map_err(CoreError::from)?;
        Ok(deadline)
    }

    /// Runs `f` on the loop thread and blocks the caller until it
    /// completes. Calling this from the loop thread itself runs `f`
    /// inline to avoid deadlocking against itself.
    pub fn sync(&self, f: impl FnOnce() + Send + 'static) -> CoreResult<()> {
        if self.is_loop_thread() {
            f();
            return Ok(());
        }

        let pair = Arc::new((Mutex::new(false), Condvar::new()));
        let pair2 = pair.clone();
        self.post(move || {
            f();
            let (lock, cvar) = &*pair2;
            let mut done = lock.lock().unwrap();
            *done = true;
            cvar.notify_one();
        })?;

        let (lock, cvar) = &*pair;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
        Ok(())
    }

    /// Wakes a blocked `run`/`run_once` without posting any work.
    pub fn wakeup(&self) -> CoreResult<()> {
        self.waker.wakeup().map_err(CoreError::from)
    }

    /// Invalidates every outstanding task carrying `token`. Tasks already
    /// queued keep their slot but become no-ops when dispatched. If called
    /// from a thread other than the loop thread while a task stamped with
    /// this token is currently executing, blocks until it finishes so the
    /// caller can safely free resources the task might touch.
    pub fn cancel(&self, token: &Token) -> CoreResult<()> {
        token.check_owner(self.id)?;
        token.bump_generation();
        #[cfg(feature = "stats")]
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);

        if self.is_loop_thread() {
            return Ok(());
        }

        let mut executing = self.executing.lock().unwrap();
        if executing.as_ref() == Some(token) {
            debug!("cancel blocking for in-flight task on loop {}", self.id);
            while executing.as_ref() == Some(token) {
                executing = self.executing_done.wait(executing).unwrap();
            }
        }
        Ok(())
    }

    fn is_loop_thread(&self) -> bool {
        *self.loop_thread.lock().unwrap() == Some(std::thread::current().id())
    }

    // ---- dispatch (C4) ----

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.tasks.close();
        let _ = self.waker.wakeup();
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Clears the stopped flag so the loop can be reused. Must only be
    /// called after `run`/`run_once` has returned.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    /// Runs one dispatch cycle: waits for I/O readiness (bounded by
    /// `timeout` and by the soonest delayed task, whichever is sooner),
    /// invokes ready descriptor callbacks, then drains the immediate and
    /// expired-delayed task queues.
    pub fn run_once(&self, timeout: Option<Duration>) -> CoreResult<()> {
        {
            let mut guard = self.loop_thread.lock().unwrap();
            let this = std::thread::current().id();
            match *guard {
                Some(id) if id != this => return Err(CoreError::InvalidState),
                _ => *guard = Some(this),
            }
        }

        let wait = match (timeout, self.delayed.next_wait()) {
            (Some(t), Some(d)) => Some(t.min(d)),
            (Some(t), None) => Some(t),
            (None, Some(d)) => Some(d),
            (None, None) => None,
        };

        let mut events = self.events.lock().unwrap();
        let n = self
            .epoll
            .wait(&mut events, wait)
            .map_err(CoreError::from)?;
        trace!("epoll_wait returned {} events", n);

        for event in events.iter() {
            let token = event.token();
            if token == WAKER_TOKEN {
                let _ = self.waker.finish();
                continue;
            }

            let callback = {
                let registry = self.registry.lock().unwrap();
                registry.slab.get(token.0).map(|r| r.callback.clone())
            };

            if let Some(callback) = callback {
                let mut callback = callback.lock().unwrap();
                (callback)(event.readiness());
            } else {
                warn!("event for unknown registration {:?}", token);
            }
        }
        drop(events);

        self.dispatch_ready_tasks();
        Ok(())
    }

    fn dispatch_ready_tasks(&self) {
        for task in self.delayed.drain_expired() {
            self.run_task(task);
        }
        while let Some(task) = self.tasks.pop() {
            self.run_task(task);
        }
    }

    fn run_task(&self, task: Task) {
        match task.cancel {
            Some((token, generation)) => {
                *self.executing.lock().unwrap() = Some(token.clone());
                if token.is_current(generation) {
                    (task.func)();
                } else {
                    trace!("skipping cancelled task {:?}", task.label);
                }
                *self.executing.lock().unwrap() = None;
                self.executing_done.notify_all();
            }
            None => (task.func)(),
        }
        #[cfg(feature = "stats")]
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs dispatch cycles until [`EventLoop::stop`] is called.
    pub fn run(&self) -> CoreResult<()> {
        debug!("event loop {} starting", self.id);
        while !self.stopped() {
            self.run_once(None)?;
        }
        *self.loop_thread.lock().unwrap() = None;
        debug!("event loop {} stopped", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpStream as StdTcpStream;
    use std::os::unix::io::AsRawFd;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use crate::epoll::Ready;
    use crate::net::tcp::TcpListener;

    #[test]
    fn register_dispatches_on_readiness() {
        let event_loop = EventLoop::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let accepted = Arc::new(AtomicBool::new(false));
        let accepted2 = accepted.clone();
        event_loop
            .register(
                listener.as_raw_fd(),
                Ready::readable(),
                Box::new(move |_ready| {
                    if listener.accept().is_ok() {
                        accepted2.store(true, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();

        let _client = StdTcpStream::connect(addr).unwrap();
        event_loop.run_once(Some(Duration::from_secs(1))).unwrap();

        assert!(accepted.load(Ordering::SeqCst));
    }

    #[test]
    fn posted_tasks_run_in_fifo_order_on_loop_thread() {
        let event_loop = Arc::new(EventLoop::new().unwrap());
        let order = Arc::new(Mutex::new(Vec::new()));

        let runner = event_loop.clone();
        let handle = thread::spawn(move || runner.run().unwrap());

        // Give the loop thread a moment to park in epoll_wait before we
        // post, so this exercises the cross-thread wakeup path.
        thread::sleep(Duration::from_millis(20));

        for i in 0..3 {
            let order = order.clone();
            event_loop.post(move || order.lock().unwrap().push(i)).unwrap();
        }

        event_loop.sync(|| {}).unwrap();
        event_loop.stop();
        handle.join().unwrap();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn cancelled_token_skips_its_queued_task_but_not_others() {
        let event_loop = EventLoop::new().unwrap();
        let token = event_loop.create_token();

        let a_ran = Arc::new(AtomicBool::new(false));
        let b_ran = Arc::new(AtomicBool::new(false));

        {
            let a_ran = a_ran.clone();
            event_loop
                .post_token(&token, move || a_ran.store(true, Ordering::SeqCst))
                .unwrap();
        }
        {
            let b_ran = b_ran.clone();
            event_loop.post(move || b_ran.store(true, Ordering::SeqCst)).unwrap();
        }

        event_loop.cancel(&token).unwrap();
        event_loop.dispatch_ready_tasks();

        assert!(!a_ran.load(Ordering::SeqCst));
        assert!(b_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn post_delayed_never_fires_before_its_deadline() {
        let event_loop = EventLoop::new().unwrap();
        let fired_at = Arc::new(Mutex::new(None));
        let start = Instant::now();
        let delay = Duration::from_millis(30);

        {
            let fired_at = fired_at.clone();
            event_loop
                .post_delayed(delay, None, move || {
                    *fired_at.lock().unwrap() = Some(Instant::now());
                })
                .unwrap();
        }

        while fired_at.lock().unwrap().is_none() {
            event_loop.run_once(Some(Duration::from_millis(10))).unwrap();
        }

        let elapsed = fired_at.lock().unwrap().unwrap() - start;
        assert!(elapsed >= delay);
    }

    #[test]
    fn unregister_stops_delivering_events_for_that_fd() {
        let event_loop = EventLoop::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let fd = listener.as_raw_fd();

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let id = event_loop
            .register(
                fd,
                Ready::readable(),
                Box::new(move |_ready| {
                    hits2.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        event_loop.unregister(id, false).unwrap();

        let _client = StdTcpStream::connect(addr).unwrap();
        event_loop.run_once(Some(Duration::from_millis(50))).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
