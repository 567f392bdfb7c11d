use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures_util::stream::Stream;
use futures_util::task::{self, ArcWake};
use spin::mutex::spin::SpinMutex as Mutex;

use crate::buffer::BoxStream;

/// Splits `source` into two readers that each observe every chunk.
///
/// Chunks pulled by one branch are queued for the other until it catches up.
/// When a queue would grow past `limit` bytes the fork fails on both sides.
/// A failure of the source reaches both readers as the same error.
pub(crate) fn tee(source: BoxStream, limit: u64) -> (TeeBranch, TeeBranch) {
    let shared = Arc::new(Mutex::new(TeeShared {
        source: Some(source),
        branches: [BranchState::default(), BranchState::default()],
        failure: None,
        limit,
        wakers: Arc::new(BranchWakers::default()),
    }));

    (
        TeeBranch {
            shared: Arc::clone(&shared),
            side: 0,
        },
        TeeBranch { shared, side: 1 },
    )
}

struct TeeShared {
    source: Option<BoxStream>,
    branches: [BranchState; 2],
    /// Replayed to the other branch once its queue is drained.
    failure: Option<crate::Error>,
    limit: u64,
    wakers: Arc<BranchWakers>,
}

#[derive(Default)]
struct BranchState {
    queue: VecDeque<Bytes>,
    queued_len: u64,
    finished: bool,
    dropped: bool,
}

/// The wakers of both branches. The source is polled with a waker that wakes
/// every parked branch, so neither depends on the other being polled again.
#[derive(Default)]
struct BranchWakers {
    slots: Mutex<[Option<Waker>; 2]>,
}

impl BranchWakers {
    fn register(&self, side: usize, waker: &Waker) {
        let mut slots = self.slots.lock();

        match &slots[side] {
            Some(registered) if registered.will_wake(waker) => {}
            _ => slots[side] = Some(waker.clone()),
        }
    }

    fn clear(&self, side: usize) {
        self.slots.lock()[side] = None;
    }

    fn wake(&self, side: usize) {
        let waker = self.slots.lock()[side].take();

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl ArcWake for BranchWakers {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let slots = mem::take(&mut *arc_self.slots.lock());

        for waker in slots.into_iter().flatten() {
            waker.wake();
        }
    }
}

pub(crate) struct TeeBranch {
    shared: Arc<Mutex<TeeShared>>,
    side: usize,
}

impl Stream for TeeBranch {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let side = self.side;
        let other = 1 - side;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        if let Some(chunk) = shared.branches[side].queue.pop_front() {
            shared.branches[side].queued_len -= chunk.len() as u64;
            return Poll::Ready(Some(Ok(chunk)));
        }

        if shared.branches[side].finished {
            return Poll::Ready(None);
        }

        if let Some(err) = shared.failure.as_ref() {
            shared.branches[side].finished = true;
            return Poll::Ready(Some(Err(err.replay())));
        }

        let Some(source) = shared.source.as_mut() else {
            shared.branches[side].finished = true;
            return Poll::Ready(None);
        };

        shared.wakers.register(side, cx.waker());

        let polled = {
            let waker = task::waker_ref(&shared.wakers);
            source.as_mut().poll_next(&mut Context::from_waker(&waker))
        };

        if polled.is_ready() {
            shared.wakers.clear(side);
        }

        match polled {
            Poll::Ready(Some(Ok(chunk))) => {
                let lagging = &mut shared.branches[other];

                if !lagging.dropped {
                    if lagging.queued_len + chunk.len() as u64 > shared.limit {
                        #[cfg(feature = "log")]
                        log::debug!("fork buffer exceeded {} bytes, failing both readers", shared.limit);

                        let err = crate::Error::ForkBufferExceeded { limit: shared.limit };
                        return Poll::Ready(Some(Err(shared.fail(side, err))));
                    }

                    lagging.queued_len += chunk.len() as u64;
                    lagging.queue.push_back(chunk.clone());
                    BranchWakers::wake(&shared.wakers, other);
                }

                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(shared.fail(side, err)))),
            Poll::Ready(None) => {
                #[cfg(feature = "log")]
                log::trace!("fork source exhausted");
                shared.source = None;
                shared.branches[side].finished = true;
                BranchWakers::wake(&shared.wakers, other);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl TeeShared {
    /// Ends the fork with `err` for `side`; the other branch gets the same
    /// error after its queued chunks.
    fn fail(&mut self, side: usize, err: crate::Error) -> crate::Error {
        self.failure = Some(err.replay());
        self.source = None;
        self.branches[side].finished = true;
        BranchWakers::wake(&self.wakers, 1 - side);
        err
    }
}

impl Drop for TeeBranch {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        let branch = &mut shared.branches[self.side];

        branch.dropped = true;
        branch.queue.clear();
        branch.queued_len = 0;

        shared.wakers.clear(self.side);
        // The source may have registered this branch's waker only.
        BranchWakers::wake(&shared.wakers, 1 - self.side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, StreamExt, TryStreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source(chunks: &[&'static str]) -> BoxStream {
        let chunks: Vec<crate::Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        Box::pin(stream::iter(chunks))
    }

    async fn collect(branch: TeeBranch) -> crate::Result<Vec<u8>> {
        branch
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }

    #[tokio::test]
    async fn test_both_branches_see_all_chunks() {
        let (a, b) = tee(source(&["ab", "cd", "ef"]), u64::MAX);

        assert_eq!(collect(a).await.unwrap(), b"abcdef");
        assert_eq!(collect(b).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_interleaved_reads() {
        let (mut a, mut b) = tee(source(&["1", "2", "3"]), u64::MAX);

        assert_eq!(a.next().await.unwrap().unwrap(), "1");
        assert_eq!(b.next().await.unwrap().unwrap(), "1");
        assert_eq!(b.next().await.unwrap().unwrap(), "2");
        assert_eq!(a.next().await.unwrap().unwrap(), "2");
        assert_eq!(a.next().await.unwrap().unwrap(), "3");
        assert!(a.next().await.is_none());
        assert_eq!(b.next().await.unwrap().unwrap(), "3");
        assert!(b.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_branch_stops_queueing() {
        let (a, b) = tee(source(&["abc", "def"]), 2);
        drop(b);

        assert_eq!(collect(a).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_lag_limit_fails_both_branches() {
        let (mut a, mut b) = tee(source(&["abc", "def", "ghi"]), 4);

        assert_eq!(a.next().await.unwrap().unwrap(), "abc");
        assert_eq!(
            a.next().await.unwrap(),
            Err(crate::Error::ForkBufferExceeded { limit: 4 })
        );
        assert!(a.next().await.is_none());

        assert_eq!(b.next().await.unwrap().unwrap(), "abc");
        assert_eq!(
            b.next().await.unwrap(),
            Err(crate::Error::ForkBufferExceeded { limit: 4 })
        );
        assert!(b.next().await.is_none());
    }

    #[tokio::test]
    async fn test_source_failure_keeps_its_kind_on_both_branches() {
        let chunks: Vec<crate::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Err(crate::Error::IncompleteFieldData {
                field_name: Some("f".to_owned()),
            }),
        ];
        let (mut a, mut b) = tee(Box::pin(stream::iter(chunks)), u64::MAX);

        assert_eq!(a.next().await.unwrap().unwrap(), "ab");
        assert!(matches!(a.next().await, Some(Err(crate::Error::IncompleteFieldData { .. }))));
        assert!(a.next().await.is_none());

        assert_eq!(b.next().await.unwrap().unwrap(), "ab");
        assert!(matches!(b.next().await, Some(Err(crate::Error::IncompleteFieldData { .. }))));
        assert!(b.next().await.is_none());
    }

    struct WakeCounter(AtomicUsize);

    impl ArcWake for WakeCounter {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_pending_source_wakes_both_parked_branches() {
        let gate: Arc<Mutex<(Option<Bytes>, Option<Waker>)>> = Arc::new(Mutex::new((None, None)));
        let source_gate = Arc::clone(&gate);
        let source = stream::poll_fn(move |cx| {
            let mut gate = source_gate.lock();

            match gate.0.take() {
                Some(chunk) => Poll::Ready(Some(Ok::<_, crate::Error>(chunk))),
                None => {
                    gate.1 = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        });

        let (mut a, mut b) = tee(Box::pin(source), u64::MAX);

        let a_wakes = Arc::new(WakeCounter(AtomicUsize::new(0)));
        let b_wakes = Arc::new(WakeCounter(AtomicUsize::new(0)));
        let a_waker = task::waker(Arc::clone(&a_wakes));
        let b_waker = task::waker(Arc::clone(&b_wakes));

        assert!(Pin::new(&mut a).poll_next(&mut Context::from_waker(&a_waker)).is_pending());
        assert!(Pin::new(&mut b).poll_next(&mut Context::from_waker(&b_waker)).is_pending());

        let source_waker = {
            let mut gate = gate.lock();
            gate.0 = Some(Bytes::from_static(b"x"));
            gate.1.take()
        };
        source_waker.unwrap().wake();

        assert_eq!(a_wakes.0.load(Ordering::SeqCst), 1);
        assert_eq!(b_wakes.0.load(Ordering::SeqCst), 1);

        let polled = Pin::new(&mut a).poll_next(&mut Context::from_waker(&a_waker));
        assert!(matches!(polled, Poll::Ready(Some(Ok(ref chunk))) if chunk == "x"));
        let polled = Pin::new(&mut b).poll_next(&mut Context::from_waker(&b_waker));
        assert!(matches!(polled, Poll::Ready(Some(Ok(ref chunk))) if chunk == "x"));
    }
}
