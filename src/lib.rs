//! Generation-based read-copy-update (RCU) reclamation with two concurrent containers.
//!
//! Readers enter a read section, follow published pointers without locks and leave.
//! Writers unpublish objects and retire them; a retired object is released only
//! after every thread that could still see it has left its read section.
//!
//! - [`RcuDomain`]: the generation clock, the thread registry and the reclamation
//!   queue, with an optional background purger.
//! - [`ReadGuard`]: a scoped, nestable read section.
//! - [`RcuBox`] and [`RcuAllocator`]: ownership and raw memory whose release is deferred.
//! - [`RcuMap`] and [`RcuVec`]: containers whose readers never block.
//!
//! # Example
//! ```
//! use swmr_rcu::{RcuDomain, RcuVec};
//!
//! let domain = RcuDomain::builder().purge_period(None).build().unwrap();
//! let values = RcuVec::new(&domain);
//!
//! for i in 0..100 {
//!     values.push_back(i);
//! }
//!
//! {
//!     let guard = domain.enter();
//!     let snapshot = values.get(&guard);
//!     assert_eq!(snapshot[42], 42);
//! }
//!
//! // Old buffers are released once no reader can still see them.
//! domain.purge();
//! ```
//!
//! 基于世代的读-复制-更新（RCU）回收机制，以及两个并发容器。
//! 读者进入读区段，无锁地跟随已发布的指针，然后离开。
//! 写入者撤销发布对象并将其退休；退休的对象只有在所有可能仍看到它的线程
//! 都离开读区段之后才会被释放。

mod alloc;
mod boxed;
pub mod config;
mod domain;
mod error;
mod garbage;
mod lifecycle;
mod map;
mod periodic;
mod reader;
mod state;
mod sync;
mod vector;

pub use alloc::RcuAllocator;
pub use boxed::{RcuBox, Retire};
pub use domain::{RcuDomain, RcuDomainBuilder};
pub use error::RcuError;
pub use garbage::PurgeStats;
pub use lifecycle::{HookId, ThreadHooks};
pub use map::{Iter as MapIter, MapTable, RcuMap};
pub use periodic::PeriodicTask;
pub use reader::{ReadGuard, ThreadAttachment};
pub use vector::{BufferState, Growth, RcuVec, VecBuffer};

#[cfg(all(test, not(feature = "loom")))]
mod tests;
