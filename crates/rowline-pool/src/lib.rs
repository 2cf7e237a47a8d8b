//! Bounded session pooling for the Rowline adapter.
//!
//! `rowline-pool` owns the live sessions for one registered connection
//! identity. Acquisition hands out an idle session, creates one while the
//! pool is below its maximum, or queues the caller FIFO until a session is
//! released. Every fresh session runs the engine bootstrap statements
//! before it is handed out; a bootstrap failure discards the session and
//! surfaces to the acquirer.
//!
//! Sessions return to the pool when the [`PooledSession`] guard drops, so
//! release happens exactly once on every exit path, including errors.

use rowline_core::driver::{Driver, SESSION_BOOTSTRAP};
use rowline_core::error::{Error, PoolError, PoolErrorKind, Result};
use rowline_core::{Cx, Outcome};

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Creates raw driver sessions for the pool.
///
/// Factories open the physical connection only; session bootstrap is the
/// pool's job so that a half-initialized session can never be observed.
pub trait SessionFactory: Send + Sync + 'static {
    /// The driver session type produced by this factory.
    type Session: Driver + Send + 'static;

    /// Open a raw session against the engine.
    fn create(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Session, Error>> + Send;
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of sessions retained through idle reaping
    pub min_sessions: usize,
    /// Maximum number of sessions allowed
    pub max_sessions: usize,
    /// Idle sessions above the minimum are destroyed after this long
    pub idle_timeout_ms: u64,
    /// Maximum time to wait for a session in milliseconds
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_sessions: 5,
            max_sessions: 20,
            idle_timeout_ms: 30_000,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with the given max sessions.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            ..Default::default()
        }
    }

    /// Set minimum sessions.
    pub fn min_sessions(mut self, n: usize) -> Self {
        self.min_sessions = n;
        self
    }

    /// Set idle timeout.
    pub fn idle_timeout(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    /// Set acquire timeout.
    pub fn acquire_timeout(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of sessions (borrowed + idle)
    pub total_sessions: usize,
    /// Number of idle sessions
    pub idle_sessions: usize,
    /// Number of borrowed sessions
    pub borrowed_sessions: usize,
    /// Number of queued acquire requests
    pub waiting: usize,
}

struct IdleSession<S> {
    session: S,
    since: Instant,
}

struct WaiterEntry {
    id: u64,
    waker: Option<Waker>,
}

struct PoolState<S> {
    idle: VecDeque<IdleSession<S>>,
    total: usize,
    waiters: VecDeque<WaiterEntry>,
    next_waiter: u64,
    closed: bool,
    drain_wakers: Vec<Waker>,
}

struct PoolInner<F: SessionFactory> {
    config: PoolConfig,
    factory: F,
    state: Mutex<PoolState<F::Session>>,
}

impl<F: SessionFactory> PoolInner<F> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Session>> {
        self.state.lock().expect("pool state poisoned")
    }

    /// Destroy idle sessions past the idle timeout, never going below the
    /// configured minimum.
    fn reap_idle(&self, state: &mut PoolState<F::Session>, now: Instant) {
        let timeout = Duration::from_millis(self.config.idle_timeout_ms);
        while state.total > self.config.min_sessions {
            match state.idle.front() {
                Some(idle) if now.duration_since(idle.since) >= timeout => {
                    state.idle.pop_front();
                    state.total -= 1;
                }
                _ => break,
            }
        }
    }

    fn wake_front_waiter(state: &mut PoolState<F::Session>) {
        if let Some(waiter) = state.waiters.front_mut() {
            if let Some(waker) = waiter.waker.take() {
                waker.wake();
            }
        }
    }

    fn wake_drain_if_quiescent(state: &mut PoolState<F::Session>) {
        if state.total == state.idle.len() {
            for waker in state.drain_wakers.drain(..) {
                waker.wake();
            }
        }
    }

    /// Return a session to the pool. Runs synchronously from the guard's
    /// drop; while the pool is draining the session is destroyed instead.
    fn release_session(&self, session: F::Session) {
        let mut state = self.lock();
        if state.closed {
            state.total -= 1;
            drop(session);
            Self::wake_drain_if_quiescent(&mut state);
            return;
        }
        state.idle.push_back(IdleSession {
            session,
            since: Instant::now(),
        });
        Self::wake_front_waiter(&mut state);
    }

    fn remove_waiter(state: &mut PoolState<F::Session>, id: u64) {
        if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
            state.waiters.remove(pos);
        }
    }
}

enum AcquirePlan {
    /// An idle session was taken under the lock
    Take,
    /// Capacity was reserved; the caller creates a session
    Create,
    /// Queue position was taken; the caller waits
    Wait { id: u64 },
}

enum WaitResult<S> {
    Session(S),
    /// Capacity freed up while waiting; retry the fast path
    Capacity,
    TimedOut,
    Closed,
}

/// A bounded pool of live engine sessions.
pub struct Pool<F: SessionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: SessionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: SessionFactory> Pool<F> {
    /// Create a new pool around a session factory.
    pub fn new(config: PoolConfig, factory: F) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                    waiters: VecDeque::new(),
                    next_waiter: 0,
                    closed: false,
                    drain_wakers: Vec::new(),
                }),
            }),
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get a statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            total_sessions: state.total,
            idle_sessions: state.idle.len(),
            borrowed_sessions: state.total - state.idle.len(),
            waiting: state.waiters.len(),
        }
    }

    /// Whether the pool has been closed by `drain`.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Borrow a session, creating one if the pool is below its maximum.
    ///
    /// Queued acquirers are served FIFO as sessions are released. The wait
    /// is bounded by `acquire_timeout_ms`; an expired wait resolves to
    /// `PoolError` with `Timeout` kind, observed at the next pool event.
    pub async fn acquire(&self, cx: &Cx) -> Outcome<PooledSession<F>, Error> {
        let deadline =
            Instant::now() + Duration::from_millis(self.inner.config.acquire_timeout_ms);

        loop {
            let plan = {
                let mut state = self.inner.lock();
                if state.closed {
                    return Outcome::Err(Error::Pool(PoolError {
                        kind: PoolErrorKind::Closed,
                        message: "pool is closed".to_string(),
                    }));
                }
                self.inner.reap_idle(&mut state, Instant::now());

                if state.waiters.is_empty() && !state.idle.is_empty() {
                    AcquirePlan::Take
                } else if state.waiters.is_empty() && state.total < self.inner.config.max_sessions
                {
                    state.total += 1;
                    AcquirePlan::Create
                } else {
                    let id = state.next_waiter;
                    state.next_waiter += 1;
                    state.waiters.push_back(WaiterEntry { id, waker: None });
                    AcquirePlan::Wait { id }
                }
            };

            match plan {
                AcquirePlan::Take => {
                    let mut state = self.inner.lock();
                    if let Some(idle) = state.idle.pop_front() {
                        return Outcome::Ok(self.wrap(idle.session));
                    }
                    // Lost the session between locks; go around again.
                }
                AcquirePlan::Create => match self.create_session(cx).await {
                    Outcome::Ok(session) => return Outcome::Ok(self.wrap(session)),
                    Outcome::Err(e) => {
                        let mut state = self.inner.lock();
                        state.total -= 1;
                        PoolInner::<F>::wake_front_waiter(&mut state);
                        PoolInner::<F>::wake_drain_if_quiescent(&mut state);
                        return Outcome::Err(e);
                    }
                    Outcome::Cancelled(r) => {
                        let mut state = self.inner.lock();
                        state.total -= 1;
                        PoolInner::<F>::wake_front_waiter(&mut state);
                        PoolInner::<F>::wake_drain_if_quiescent(&mut state);
                        return Outcome::Cancelled(r);
                    }
                    Outcome::Panicked(p) => {
                        let mut state = self.inner.lock();
                        state.total -= 1;
                        PoolInner::<F>::wake_front_waiter(&mut state);
                        PoolInner::<F>::wake_drain_if_quiescent(&mut state);
                        return Outcome::Panicked(p);
                    }
                },
                AcquirePlan::Wait { id } => {
                    let result = AcquireWait {
                        inner: &*self.inner,
                        id,
                        deadline,
                        done: false,
                    }
                    .await;
                    match result {
                        WaitResult::Session(session) => return Outcome::Ok(self.wrap(session)),
                        WaitResult::Capacity => continue,
                        WaitResult::TimedOut => {
                            return Outcome::Err(Error::Pool(PoolError {
                                kind: PoolErrorKind::Timeout,
                                message: format!(
                                    "no session became available within {}ms",
                                    self.inner.config.acquire_timeout_ms
                                ),
                            }));
                        }
                        WaitResult::Closed => {
                            return Outcome::Err(Error::Pool(PoolError {
                                kind: PoolErrorKind::Closed,
                                message: "pool closed while waiting".to_string(),
                            }));
                        }
                    }
                }
            }
        }
    }

    /// Open a raw session and run the bootstrap sequence on it, in order.
    /// Any bootstrap failure discards the session and reports to the
    /// acquirer.
    async fn create_session(&self, cx: &Cx) -> Outcome<F::Session, Error> {
        let session = match self.inner.factory.create(cx).await {
            Outcome::Ok(s) => s,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        for stmt in SESSION_BOOTSTRAP {
            match session.execute(cx, stmt, &[]).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => {
                    tracing::warn!(statement = stmt, "session bootstrap failed");
                    if let Err(close_err) = session.close(cx).await {
                        tracing::debug!(error = %close_err, "discarding failed session");
                    }
                    return Outcome::Err(Error::Pool(PoolError {
                        kind: PoolErrorKind::SessionInit,
                        message: format!("session bootstrap failed: {e}"),
                    }));
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        Outcome::Ok(session)
    }

    fn wrap(&self, session: F::Session) -> PooledSession<F> {
        PooledSession {
            session: Some(session),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Close the pool: refuse new acquisitions, wait for every borrowed
    /// session to return, then destroy all sessions.
    pub async fn drain(&self, cx: &Cx) -> Result<()> {
        {
            let mut state = self.inner.lock();
            state.closed = true;
            for waiter in &mut state.waiters {
                if let Some(waker) = waiter.waker.take() {
                    waker.wake();
                }
            }
        }

        DrainWait {
            inner: &*self.inner,
        }
        .await;

        let sessions: Vec<F::Session> = {
            let mut state = self.inner.lock();
            state.total = 0;
            state.idle.drain(..).map(|idle| idle.session).collect()
        };
        for session in sessions {
            if let Err(e) = session.close(cx).await {
                tracing::warn!(error = %e, "error closing pooled session during drain");
            }
        }
        Ok(())
    }
}

/// A session borrowed from the pool.
///
/// Dereferences to the driver session. Returns to the pool on drop; while
/// the pool is draining, drop destroys the session instead.
pub struct PooledSession<F: SessionFactory> {
    session: Option<F::Session>,
    inner: Arc<PoolInner<F>>,
}

impl<F: SessionFactory> std::ops::Deref for PooledSession<F> {
    type Target = F::Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref().expect("session already released")
    }
}

impl<F: SessionFactory> std::ops::DerefMut for PooledSession<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut().expect("session already released")
    }
}

impl<F: SessionFactory> Drop for PooledSession<F> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.inner.release_session(session);
        }
    }
}

struct AcquireWait<'a, F: SessionFactory> {
    inner: &'a PoolInner<F>,
    id: u64,
    deadline: Instant,
    done: bool,
}

impl<F: SessionFactory> Future for AcquireWait<'_, F> {
    type Output = WaitResult<F::Session>;

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.inner.lock();

        if state.closed {
            PoolInner::<F>::remove_waiter(&mut state, this.id);
            this.done = true;
            return Poll::Ready(WaitResult::Closed);
        }

        let at_front = state.waiters.front().is_some_and(|w| w.id == this.id);
        if at_front {
            if let Some(idle) = state.idle.pop_front() {
                state.waiters.pop_front();
                this.done = true;
                return Poll::Ready(WaitResult::Session(idle.session));
            }
            if state.total < this.inner.config.max_sessions {
                state.waiters.pop_front();
                this.done = true;
                return Poll::Ready(WaitResult::Capacity);
            }
        }

        if Instant::now() >= this.deadline {
            PoolInner::<F>::remove_waiter(&mut state, this.id);
            this.done = true;
            return Poll::Ready(WaitResult::TimedOut);
        }

        if let Some(entry) = state.waiters.iter_mut().find(|w| w.id == this.id) {
            entry.waker = Some(task_cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<F: SessionFactory> Drop for AcquireWait<'_, F> {
    fn drop(&mut self) {
        if !self.done {
            let mut state = self.inner.lock();
            PoolInner::<F>::remove_waiter(&mut state, self.id);
            // A session released to us while we were being dropped stays
            // idle; hand the turn to the next waiter.
            PoolInner::<F>::wake_front_waiter(&mut state);
        }
    }
}

struct DrainWait<'a, F: SessionFactory> {
    inner: &'a PoolInner<F>,
}

impl<F: SessionFactory> Future for DrainWait<'_, F> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.lock();
        if state.total == state.idle.len() {
            Poll::Ready(())
        } else {
            state.drain_wakers.push(task_cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use rowline_core::driver::ExecResult;
    use rowline_core::value::Value;

    #[derive(Debug, Default)]
    struct FactoryState {
        created: usize,
        closed: usize,
        executed: Vec<String>,
        fail_bootstrap: bool,
    }

    #[derive(Clone)]
    struct MockFactory {
        state: Arc<Mutex<FactoryState>>,
    }

    impl MockFactory {
        fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(FactoryState::default())),
            }
        }
    }

    struct MockSession {
        state: Arc<Mutex<FactoryState>>,
    }

    impl Driver for MockSession {
        fn execute(
            &self,
            _cx: &Cx,
            sql: &str,
            _params: &[Value],
        ) -> impl Future<Output = Outcome<ExecResult, Error>> + Send {
            let state = Arc::clone(&self.state);
            let sql = sql.to_string();
            async move {
                let mut guard = state.lock().expect("lock poisoned");
                if guard.fail_bootstrap && sql.starts_with("ALTER SESSION") {
                    return Outcome::Err(Error::execution("bootstrap rejected"));
                }
                guard.executed.push(sql);
                Outcome::Ok(ExecResult::default())
            }
        }

        fn close(self, _cx: &Cx) -> impl Future<Output = Result<()>> + Send {
            let state = Arc::clone(&self.state);
            async move {
                state.lock().expect("lock poisoned").closed += 1;
                Ok(())
            }
        }
    }

    impl SessionFactory for MockFactory {
        type Session = MockSession;

        fn create(&self, _cx: &Cx) -> impl Future<Output = Outcome<MockSession, Error>> + Send {
            let state = Arc::clone(&self.state);
            async move {
                state.lock().expect("lock poisoned").created += 1;
                Outcome::Ok(MockSession { state })
            }
        }
    }

    fn unwrap_outcome<T, E: std::fmt::Debug>(outcome: Outcome<T, E>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error outcome: {e:?}"),
            _ => panic!("unexpected non-ok outcome"),
        }
    }

    fn test_pool(config: PoolConfig) -> (Pool<MockFactory>, Arc<Mutex<FactoryState>>) {
        let factory = MockFactory::new();
        let state = Arc::clone(&factory.state);
        (Pool::new(config, factory), state)
    }

    #[test]
    fn fresh_session_runs_bootstrap_in_order() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (pool, state) = test_pool(PoolConfig::new(2).min_sessions(0));

        rt.block_on(async {
            let _session = unwrap_outcome(pool.acquire(&cx).await);
            let executed = state.lock().expect("lock poisoned").executed.clone();
            assert_eq!(executed.len(), SESSION_BOOTSTRAP.len());
            for (got, want) in executed.iter().zip(SESSION_BOOTSTRAP) {
                assert_eq!(got.as_str(), want);
            }
        });
    }

    #[test]
    fn bootstrap_failure_discards_session() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (pool, state) = test_pool(PoolConfig::new(2).min_sessions(0));
        state.lock().expect("lock poisoned").fail_bootstrap = true;

        rt.block_on(async {
            match pool.acquire(&cx).await {
                Outcome::Err(Error::Pool(e)) => assert_eq!(e.kind, PoolErrorKind::SessionInit),
                _ => panic!("expected session-init failure"),
            }
        });

        // The failed session was closed and capacity restored
        assert_eq!(state.lock().expect("lock poisoned").closed, 1);
        assert_eq!(pool.stats().total_sessions, 0);
    }

    #[test]
    fn released_session_is_reused() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (pool, state) = test_pool(PoolConfig::new(2).min_sessions(1));

        rt.block_on(async {
            let session = unwrap_outcome(pool.acquire(&cx).await);
            drop(session);
            let _again = unwrap_outcome(pool.acquire(&cx).await);
        });

        assert_eq!(state.lock().expect("lock poisoned").created, 1);
    }

    #[test]
    fn at_capacity_acquire_times_out_distinctly() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (pool, _state) = test_pool(PoolConfig::new(1).min_sessions(0).acquire_timeout(0));

        rt.block_on(async {
            let held = unwrap_outcome(pool.acquire(&cx).await);
            match pool.acquire(&cx).await {
                Outcome::Err(Error::Pool(e)) => assert_eq!(e.kind, PoolErrorKind::Timeout),
                _ => panic!("expected timeout"),
            }
            drop(held);
        });
    }

    #[test]
    fn stats_track_borrowed_and_idle() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (pool, _state) = test_pool(PoolConfig::new(3).min_sessions(0));

        rt.block_on(async {
            let session = unwrap_outcome(pool.acquire(&cx).await);
            let stats = pool.stats();
            assert_eq!(stats.total_sessions, 1);
            assert_eq!(stats.borrowed_sessions, 1);
            assert_eq!(stats.idle_sessions, 0);

            drop(session);
            let stats = pool.stats();
            assert_eq!(stats.borrowed_sessions, 0);
            assert_eq!(stats.idle_sessions, 1);
        });
    }

    #[test]
    fn idle_reaping_respects_minimum() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        // Zero idle timeout: idle sessions above the minimum die on the
        // next acquire.
        let (pool, state) = test_pool(PoolConfig::new(3).min_sessions(0).idle_timeout(0));

        rt.block_on(async {
            let first = unwrap_outcome(pool.acquire(&cx).await);
            drop(first);
            assert_eq!(pool.stats().idle_sessions, 1);

            // Reap happens before reuse, so a new session is created.
            let _second = unwrap_outcome(pool.acquire(&cx).await);
        });

        assert_eq!(state.lock().expect("lock poisoned").created, 2);
    }

    #[test]
    fn drain_destroys_sessions_and_rejects_acquire() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (pool, state) = test_pool(PoolConfig::new(2).min_sessions(2));

        rt.block_on(async {
            let session = unwrap_outcome(pool.acquire(&cx).await);
            drop(session);

            pool.drain(&cx).await.expect("drain");
            assert_eq!(state.lock().expect("lock poisoned").closed, 1);
            assert_eq!(pool.stats().total_sessions, 0);

            match pool.acquire(&cx).await {
                Outcome::Err(Error::Pool(e)) => assert_eq!(e.kind, PoolErrorKind::Closed),
                _ => panic!("expected closed pool error"),
            }
        });
    }

    #[test]
    fn session_released_while_draining_is_destroyed() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create runtime");
        let cx = Cx::for_testing();
        let (pool, _state) = test_pool(PoolConfig::new(2).min_sessions(0));

        rt.block_on(async {
            let session = unwrap_outcome(pool.acquire(&cx).await);
            // Close the pool while the session is still borrowed, then
            // return it: the drop path must destroy rather than idle it.
            {
                let mut state = pool.inner.lock();
                state.closed = true;
            }
            drop(session);
            assert_eq!(pool.stats().total_sessions, 0);
            assert_eq!(pool.stats().idle_sessions, 0);
        });
    }
}
