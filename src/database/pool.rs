use std::collections::VecDeque;
use std::ops::{Deref, DerefMut, Drop};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use futures::channel::oneshot;

#[async_trait]
pub trait Factory: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error;

    async fn make(&self) -> Result<Self::Output, Self::Error>;

    /// Broken connections are dropped instead of going back to the pool.
    fn is_broken(&self, _connect: &Self::Output) -> bool {
        false
    }
}

/// A connection borrowed from the pool, returned to it on drop.
///
/// Inside the pool a `Connect` without a connection stands for an opening
/// slot; dropping it gives the slot back.
pub struct Connect<F: Factory> {
    connect: Option<F::Output>,
    pool: Weak<SharedPool<F>>,
}

impl<F: Factory> Connect<F> {
    /// Detaches from the pool so that dropping does nothing.
    fn disarm(&mut self) -> Option<F::Output> {
        self.pool = Weak::new();
        self.connect.take()
    }
}

impl<F: Factory> Deref for Connect<F> {
    type Target = F::Output;

    fn deref(&self) -> &F::Output {
        self.connect.as_ref().expect("connection used after release")
    }
}

impl<F: Factory> DerefMut for Connect<F> {
    fn deref_mut(&mut self) -> &mut F::Output {
        self.connect.as_mut().expect("connection used after release")
    }
}

impl<F: Factory> Drop for Connect<F> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            match self.connect.take() {
                Some(connect) => pool.put_back(connect),
                None => pool.release_slot(),
            }
        }
    }
}

type Waiter<F> = oneshot::Sender<Connect<F>>;

struct InternalPool<F: Factory> {
    waiters: VecDeque<Waiter<F>>,
    conns: VecDeque<F::Output>,
    opened: usize,
}

struct SharedPool<F: Factory> {
    factory: F,
    inner: Mutex<InternalPool<F>>,
    max: usize,
}

impl<F: Factory> SharedPool<F> {
    fn lock(&self) -> MutexGuard<'_, InternalPool<F>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put_back(self: &Arc<Self>, connect: F::Output) {
        if self.factory.is_broken(&connect) {
            log::warn!("a broken connection was dropped from the pool");
            self.release_slot();
            return;
        }
        self.hand_over(Connect {
            connect: Some(connect),
            pool: Arc::downgrade(self),
        });
    }

    fn release_slot(self: &Arc<Self>) {
        self.hand_over(Connect {
            connect: None,
            pool: Arc::downgrade(self),
        });
    }

    // Sends happen outside the lock: a value the receiver gave up on is
    // dropped by the channel, and its drop takes the lock again.
    fn hand_over(&self, mut handoff: Connect<F>) {
        loop {
            let waiter = {
                let mut internal = self.lock();
                match internal.waiters.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        match handoff.disarm() {
                            Some(connect) => internal.conns.push_back(connect),
                            None => internal.opened = internal.opened.saturating_sub(1),
                        }
                        return;
                    }
                }
            };
            match waiter.send(handoff) {
                Ok(()) => return,
                Err(returned) => handoff = returned,
            }
        }
    }
}

pub struct Pool<F: Factory> {
    inner: Arc<SharedPool<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<F: Factory> Pool<F> {
    /// Opens `num` connections up front; the pool never holds more than that.
    pub async fn with_num(num: usize, factory: F) -> Result<Pool<F>, F::Error> {
        let mut conns: VecDeque<F::Output> = VecDeque::with_capacity(num);
        for _ in 0..num {
            conns.push_back(factory.make().await?);
        }
        let waiters = VecDeque::new();
        let internal_pool = InternalPool {
            waiters,
            conns,
            opened: num,
        };
        let shared_pool = SharedPool {
            factory,
            inner: Mutex::new(internal_pool),
            max: num.max(1),
        };
        Ok(Pool {
            inner: Arc::new(shared_pool),
        })
    }

    fn wrap(&self, connect: Option<F::Output>) -> Connect<F> {
        Connect {
            connect,
            pool: Arc::downgrade(&self.inner),
        }
    }

    pub async fn get(&self) -> Result<Connect<F>, F::Error> {
        let receiver = {
            let mut internal = self.inner.lock();
            if let Some(connect) = internal.conns.pop_front() {
                return Ok(self.wrap(Some(connect)));
            }
            if internal.opened < self.inner.max {
                internal.opened += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                internal.waiters.push_back(tx);
                Some(rx)
            }
        };
        let mut slot = match receiver {
            None => self.wrap(None),
            Some(rx) => match rx.await {
                Ok(connect) if connect.connect.is_some() => return Ok(connect),
                Ok(slot) => slot,
                Err(oneshot::Canceled) => {
                    self.inner.lock().opened += 1;
                    self.wrap(None)
                }
            },
        };
        // the slot goes back to the pool if `make` fails or this future is dropped
        let connect = self.inner.factory.make().await?;
        slot.connect = Some(connect);
        Ok(slot)
    }

    #[cfg(test)]
    pub fn idle(&self) -> usize {
        self.inner.lock().conns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    struct Counter {
        made: AtomicUsize,
        slow: AtomicBool,
    }

    struct Fake {
        id: usize,
        broken: bool,
    }

    #[async_trait]
    impl Factory for Arc<Counter> {
        type Output = Fake;
        type Error = ();

        async fn make(&self) -> Result<Fake, ()> {
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let id = self.made.fetch_add(1, Ordering::SeqCst);
            Ok(Fake { id, broken: false })
        }

        fn is_broken(&self, connect: &Fake) -> bool {
            connect.broken
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            made: AtomicUsize::new(0),
            slow: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn pool_test() {
        let factory = counter();
        let pool = Pool::with_num(2, factory.clone()).await.unwrap();
        assert_eq!(pool.idle(), 2);
        let a = pool.get().await.unwrap();
        assert_eq!(pool.idle(), 1);
        let id = a.id;
        drop(a);
        assert_eq!(pool.idle(), 2);
        let b = pool.get().await.unwrap();
        let c = pool.get().await.unwrap();
        assert_ne!(b.id, c.id);
        assert!(b.id == id || c.id == id);
        assert_eq!(factory.made.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn waiter_receives_released_connection() {
        let pool = Pool::with_num(1, counter()).await.unwrap();
        let held = pool.get().await.unwrap();
        let held_id = held.id;
        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.unwrap().id })
        };
        tokio::task::yield_now().await;
        drop(held);
        assert_eq!(waiting.await.unwrap(), held_id);
    }

    #[tokio::test]
    async fn broken_connection_is_replaced() {
        let factory = counter();
        let pool = Pool::with_num(1, factory.clone()).await.unwrap();
        let mut connect = pool.get().await.unwrap();
        connect.broken = true;
        drop(connect);
        assert_eq!(pool.idle(), 0);
        let fresh = pool.get().await.unwrap();
        assert_eq!(fresh.id, 1);
        assert_eq!(factory.made.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_open_gives_the_slot_back() {
        let factory = counter();
        let pool = Pool::with_num(1, factory.clone()).await.unwrap();
        let mut connect = pool.get().await.unwrap();
        connect.broken = true;
        drop(connect);

        factory.slow.store(true, Ordering::SeqCst);
        let opening = timeout(Duration::from_millis(20), pool.get()).await;
        assert!(opening.is_err());

        factory.slow.store(false, Ordering::SeqCst);
        let fresh = timeout(Duration::from_secs(5), pool.get())
            .await
            .expect("the pool is stuck")
            .unwrap();
        assert_eq!(fresh.id, 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_lose_the_connection() {
        let pool = Pool::with_num(1, counter()).await.unwrap();
        let held = pool.get().await.unwrap();
        let held_id = held.id;
        let waiting = timeout(Duration::from_millis(20), pool.get()).await;
        assert!(waiting.is_err());
        drop(held);
        assert_eq!(pool.idle(), 1);
        let again = timeout(Duration::from_secs(5), pool.get())
            .await
            .expect("the pool is stuck")
            .unwrap();
        assert_eq!(again.id, held_id);
    }

    #[tokio::test]
    async fn failed_open_gives_the_slot_back() {
        struct Refuse;

        #[async_trait]
        impl Factory for Refuse {
            type Output = ();
            type Error = &'static str;

            async fn make(&self) -> Result<(), &'static str> {
                Err("refused")
            }
        }

        let pool = Pool::with_num(0, Refuse).await.unwrap();
        assert!(pool.get().await.is_err());
        // a leaked slot would make this wait forever instead of failing again
        let again = timeout(Duration::from_secs(5), pool.get()).await.expect("the pool is stuck");
        assert!(again.is_err());
    }
}
