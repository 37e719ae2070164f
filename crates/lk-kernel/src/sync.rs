//! Blocking primitives built on wait queues, and the lock under them.

pub mod event;
pub mod mutex;
pub mod semaphore;
pub mod spinlock;

pub use event::{Event, EventFlags};
pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use spinlock::{CriticalSection, SpinLock};
