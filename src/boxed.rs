use crate::domain::RcuDomain;
use crate::state::SharedState;
use crate::sync::Weak;
use std::boxed::Box;
use std::mem::ManuallyDrop;
use std::ops::Deref;

/// Values that can be handed to the reclamation queue.
///
/// Implemented for every sized `Send + 'static` type and for slices of them.
///
/// 可以交给回收队列的值。为所有 `Send + 'static` 的定长类型及其切片实现。
pub trait Retire: Send + 'static {
    /// Defer dropping `self` until the current grace period has elapsed.
    fn retire(self: Box<Self>, domain: &RcuDomain);
}

impl<T: Send + 'static> Retire for T {
    #[inline]
    fn retire(self: Box<Self>, domain: &RcuDomain) {
        domain.free_object(self);
    }
}

impl<T: Send + 'static> Retire for [T] {
    #[inline]
    fn retire(self: Box<Self>, domain: &RcuDomain) {
        domain.free_array(self);
    }
}

/// An owning pointer whose drop is deferred through the reclamation queue.
///
/// Dropping an `RcuBox` does not release the value; it retires it, so readers that
/// reached the value inside a read section keep a valid reference until they leave.
/// Once the domain itself is gone the value is dropped on the spot.
///
/// Wrap it in an `Arc` for shared ownership with the same deferred release.
///
/// 一个 drop 会经由回收队列延迟执行的拥有型指针。
/// drop `RcuBox` 不会立即释放值，而是将其退休，因此在读区段内访问到该值的读者
/// 在离开之前一直持有有效的引用。一旦域本身已不存在，值会被立即 drop。
pub struct RcuBox<T: ?Sized + Retire> {
    value: ManuallyDrop<Box<T>>,
    domain: Weak<SharedState>,
}

impl<T: Send + 'static> RcuBox<T> {
    /// Allocate `value` under `domain`.
    #[inline]
    pub fn new(domain: &RcuDomain, value: T) -> Self {
        Self::from_box(domain, Box::new(value))
    }

    /// Build the value with `make`; on failure nothing was published, so nothing is retired.
    ///
    /// 用 `make` 构建值；失败时没有任何东西被发布，因此不会退休任何东西。
    pub fn try_new_with<E, F>(domain: &RcuDomain, make: F) -> Result<Self, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        make().map(|value| Self::new(domain, value))
    }
}

impl<T: Default + Send + 'static> RcuBox<[T]> {
    /// Allocate a slice of `len` default values under `domain`.
    pub fn new_slice(domain: &RcuDomain, len: usize) -> Self {
        let values: Box<[T]> = (0..len).map(|_| T::default()).collect();
        Self::from_box(domain, values)
    }
}

impl<T: ?Sized + Retire> RcuBox<T> {
    /// Take ownership of an existing box.
    #[inline]
    pub fn from_box(domain: &RcuDomain, value: Box<T>) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            domain: domain.downgrade(),
        }
    }
}

impl<T: ?Sized + Retire> Deref for RcuBox<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: ?Sized + Retire> Drop for RcuBox<T> {
    fn drop(&mut self) {
        // SAFETY: `value` is never touched again after this point.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };

        match RcuDomain::upgrade(&self.domain) {
            Some(domain) => value.retire(&domain),
            None => drop(value),
        }
    }
}

impl<T: ?Sized + Retire + std::fmt::Debug> std::fmt::Debug for RcuBox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RcuBox").field(&&**self.value).finish()
    }
}
