#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut heap = lock!(self.heap);
///  heap.alloc(object);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let data = read_lock!(my_arc_rwlock);
///  println!("{}", data.some_field);
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut data = write_lock!(my_arc_rwlock);
///  data.some_field = 42;
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().expect("Failed to acquire write lock")
    };
}

/// Helper macro for running a closure against the heap while holding its lock
///
/// ```rust, ignore
///  let name = with_heap!(self, |heap| heap.type_name(object));
/// ```
macro_rules! with_heap {
    ($host:expr, $closure:expr) => {{
        let mut guard = $host.heap.lock().expect("Failed to acquire lock");
        $closure(&mut *guard)
    }};
}
