#![allow(unused_macros)]

/// Helper macro for reading locked items, propagating poisoning as [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let data = read_lock!(my_arc_rwlock);
///  println!("{}", data.some_field);
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for writing to locked items, propagating poisoning as [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let mut data = write_lock!(my_arc_rwlock);
///  data.some_field = 42;
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let name = with_read!(binding, |runtime| runtime.clone());
/// ```
macro_rules! with_read {
    ($arc_rwlock:expr, $closure:expr) => {{
        let guard = $arc_rwlock.read().map_err(|_| crate::Error::LockError)?;
        $closure(&*guard)
    }};
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  with_write!(binding, |slot| *slot = None);
/// ```
macro_rules! with_write {
    ($arc_rwlock:expr, $closure:expr) => {{
        let mut guard = $arc_rwlock.write().map_err(|_| crate::Error::LockError)?;
        $closure(&mut *guard)
    }};
}
