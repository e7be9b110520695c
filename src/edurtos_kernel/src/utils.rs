#![allow(clippy::declare_interior_mutable_const)]
use core::{marker::PhantomData, sync::atomic};

/// Trait for types having a constant default value. This is essentially a
/// constant version of `Default`.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl<T: ?Sized> Init for PhantomData<T> {
    const INIT: Self = PhantomData;
}

impl<T: Init, const LEN: usize> Init for [T; LEN] {
    const INIT: Self = [const { T::INIT }; LEN];
}

impl Init for atomic::AtomicBool {
    const INIT: Self = atomic::AtomicBool::new(false);
}

impl Init for atomic::AtomicU32 {
    const INIT: Self = atomic::AtomicU32::new(0);
}

impl Init for atomic::AtomicUsize {
    const INIT: Self = atomic::AtomicUsize::new(0);
}

macro_rules! impl_init {
    ( $( $ty:ty => $value:expr, )* ) => {
        $(
            impl Init for $ty {
                const INIT: Self = $value;
            }
        )*
    };
}

impl_init! {
    bool => false,
    u32 => 0,
    usize => 0,
    () => (),
}
