pub mod worker;

use std::thread;

/// Spawns an OS thread with a readable name, panicking only if the name is
/// invalid for the platform (it never is for plain UTF-8 names).
pub fn spawn_named_thread<F, T, S>(name: S, f: F) -> thread::JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
    S: ToString,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .expect("thread config should be valid")
}
