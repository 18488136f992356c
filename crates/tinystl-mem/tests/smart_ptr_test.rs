use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use tinystl_mem::smart::{
    BadWeakPtr, DefaultDelete, FnDeleter, OwnerKey, SharedPtr, UniquePtr, WeakPtr, deleter_fn,
};

/// Counts drops of the values it is attached to.
struct DropCounter {
    drops: Arc<AtomicUsize>,
    payload: u64,
}

impl DropCounter {
    fn new(drops: &Arc<AtomicUsize>, payload: u64) -> Self {
        Self {
            drops: Arc::clone(drops),
            payload,
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn use_count_follows_clones_and_drops() {
    let drops = Arc::new(AtomicUsize::new(0));
    let first = SharedPtr::new(DropCounter::new(&drops, 11));
    let observer = first.downgrade();
    assert_eq!(first.use_count(), 1);
    assert_eq!(observer.use_count(), 1);
    assert!(first.is_unique());

    let mut owners = vec![first];
    for expected in 2..=16 {
        owners.push(owners[0].clone());
        assert_eq!(observer.use_count(), expected);
    }
    while let Some(owner) = owners.pop() {
        assert_eq!(owner.payload, 11);
        drop(owner);
        assert_eq!(observer.use_count(), owners.len());
        let expected_drops = usize::from(owners.is_empty());
        assert_eq!(drops.load(Ordering::SeqCst), expected_drops);
    }

    assert!(observer.expired());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn custom_deleter_runs_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let raw = NonNull::from(Box::leak(Box::new([7u8; 24])));
    let deleter = deleter_fn(move |p: NonNull<[u8; 24]>| {
        // SAFETY: `p` is the leaked box, reclaimed once.
        drop(unsafe { Box::from_raw(p.as_ptr()) });
        counter.fetch_add(1, Ordering::SeqCst);
    });
    // SAFETY: the deleter reclaims `raw`.
    let shared = unsafe { SharedPtr::with_deleter(raw, deleter) };
    let a = shared.clone();
    let b = a.clone();
    drop(shared);
    drop(a);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    drop(b);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn get_deleter_finds_the_stored_deleter() {
    let shared = SharedPtr::new(3u16);
    assert!(shared.get_deleter::<DefaultDelete>().is_some());
    assert!(shared.get_deleter::<FnDeleter<fn(NonNull<u16>)>>().is_none());
    assert!(SharedPtr::<u16>::null().get_deleter::<DefaultDelete>().is_none());
}

#[test]
fn weak_expires_with_last_owner() {
    let drops = Arc::new(AtomicUsize::new(0));
    let owner = SharedPtr::new(DropCounter::new(&drops, 1));
    let weak: WeakPtr<DropCounter> = WeakPtr::from(&owner);
    let weak_copy = weak.clone();

    let upgraded = weak.lock();
    assert_eq!(upgraded.payload, 1);
    drop(owner);
    assert!(!weak.expired());
    drop(upgraded);

    assert!(weak.expired());
    assert!(weak_copy.expired());
    assert!(weak.lock().is_null());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(
        SharedPtr::<DropCounter>::try_from(&weak_copy).map(|_| ()),
        Err(BadWeakPtr)
    );
}

#[test]
fn aliasing_pointer_keeps_the_whole_object_alive() {
    struct Node {
        name: String,
        weight: u32,
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let owner = SharedPtr::new((
        Node {
            name: String::from("root"),
            weight: 9,
        },
        DropCounter::new(&drops, 0),
    ));
    let weight = owner.project(|pair| &pair.0.weight);
    let name = owner.project(|pair| pair.0.name.as_str());
    assert!(weight.owner_eq(&owner));
    assert_eq!(owner.use_count(), 3);

    drop(owner);
    assert_eq!(*weight, 9);
    assert_eq!(&*name, "root");
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(weight);
    drop(name);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn unique_to_shared_leaves_unique_empty_and_keeps_deleter() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let raw = NonNull::from(Box::leak(Box::new(String::from("moved"))));
    let deleter = deleter_fn(move |p: NonNull<String>| {
        // SAFETY: `p` is the leaked box, reclaimed once.
        drop(unsafe { Box::from_raw(p.as_ptr()) });
        counter.fetch_add(1, Ordering::SeqCst);
    });
    // SAFETY: the deleter reclaims `raw`.
    let unique = unsafe { UniquePtr::from_raw_with_deleter(raw, deleter) };

    let shared = SharedPtr::try_from_unique(unique).unwrap();
    assert_eq!(shared.as_str(), "moved");
    assert_eq!(shared.as_ptr(), Some(raw));
    assert_eq!(shared.use_count(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    drop(shared);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let empty: UniquePtr<u8> = UniquePtr::null();
    let shared_empty = SharedPtr::from(empty);
    assert!(shared_empty.is_null());
    assert_eq!(shared_empty.use_count(), 0);
}

#[test]
fn unique_slice_into_shared() {
    let unique = UniquePtr::<[u32]>::new_slice(5);
    let shared: SharedPtr<[u32]> = SharedPtr::from(unique);
    assert_eq!(shared.len(), 5);
    assert!(shared.iter().all(|&v| v == 0));
}

#[test]
fn owner_ordering_is_consistent() {
    let a = SharedPtr::new(1u8);
    let b = SharedPtr::new(2u8);
    let wa = a.downgrade();
    assert_ne!(a.owner_before(&b), b.owner_before(&a));
    assert!(!a.owner_before(&wa) && !wa.owner_before(&a));
    assert_eq!(a.owner_key(), wa.owner_key());
}

#[test]
fn concurrent_clone_and_drop_destroys_once() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let drops = Arc::new(AtomicUsize::new(0));
    let shared = SharedPtr::new(DropCounter::new(&drops, 42));
    let observer = shared.downgrade();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let local = shared.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let copy = local.clone();
                    assert_eq!(copy.payload, 42);
                    drop(copy);
                }
            })
        })
        .collect();
    drop(shared);
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(observer.expired());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn lock_racing_last_release_never_revives() {
    for _ in 0..200 {
        let drops = Arc::new(AtomicUsize::new(0));
        let owner = SharedPtr::new(DropCounter::new(&drops, 5));
        let weak = owner.downgrade();
        let barrier = Arc::new(Barrier::new(2));

        let locker = {
            let barrier = Arc::clone(&barrier);
            let drops = Arc::clone(&drops);
            thread::spawn(move || {
                let mut saw_dead = false;
                barrier.wait();
                for _ in 0..64 {
                    let upgraded = weak.lock();
                    match upgraded.get() {
                        Some(counter) => {
                            assert!(!saw_dead, "lock() revived an expired object");
                            assert_eq!(counter.payload, 5);
                            assert_eq!(drops.load(Ordering::SeqCst), 0);
                        }
                        None => saw_dead = true,
                    }
                }
                weak
            })
        };

        barrier.wait();
        drop(owner);
        let weak = locker.join().unwrap();

        assert!(weak.expired());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn weak_outliving_owner_across_threads() {
    let owner = SharedPtr::new(vec![1u32, 2, 3]);
    let weak = owner.downgrade();
    let handle = thread::spawn(move || {
        let sum: u32 = owner.iter().sum();
        drop(owner);
        sum
    });
    assert_eq!(handle.join().unwrap(), 6);
    assert!(weak.expired());
}
