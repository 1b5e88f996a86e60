//! Interposed transactional scalar.
//!
//! A [`TCell`] is a 64-bit cell whose load and store are the only
//! instrumented memory operations in the system. Inside a transaction they
//! go through the lock manager and abort on a die decision; outside one they
//! are plain memory accesses. Larger objects become transactional by
//! composition, one cell per field.

use crate::stm;
use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{AddAssign, SubAssign};

/// Values storable in a [`TCell`]: plain-data types of at most eight bytes
/// with a lossless round trip through a `u64` word.
///
/// # Safety
///
/// `from_word(into_word(v))` must reproduce `v` exactly, and `from_word` must
/// tolerate any word previously produced by `into_word` of the same type.
pub unsafe trait TmValue: Copy {
    /// Pack the value into a word.
    fn into_word(self) -> u64;
    /// Unpack a word produced by [`TmValue::into_word`].
    ///
    /// # Safety
    ///
    /// `word` must come from `into_word` of the same type.
    unsafe fn from_word(word: u64) -> Self;
}

macro_rules! tm_value_int {
    ($($t:ty),*) => {
        $(
            // SAFETY: lossless as-cast round trip within 64 bits.
            unsafe impl TmValue for $t {
                #[inline]
                fn into_word(self) -> u64 {
                    self as u64
                }
                #[inline]
                unsafe fn from_word(word: u64) -> Self {
                    word as $t
                }
            }
        )*
    };
}

tm_value_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

// SAFETY: bool round-trips through 0/1.
unsafe impl TmValue for bool {
    #[inline]
    fn into_word(self) -> u64 {
        self as u64
    }
    #[inline]
    unsafe fn from_word(word: u64) -> Self {
        word != 0
    }
}

// SAFETY: pointers round-trip through their address.
unsafe impl<T> TmValue for *mut T {
    #[inline]
    fn into_word(self) -> u64 {
        self as usize as u64
    }
    #[inline]
    unsafe fn from_word(word: u64) -> Self {
        word as usize as *mut T
    }
}

// SAFETY: as above.
unsafe impl<T> TmValue for *const T {
    #[inline]
    fn into_word(self) -> u64 {
        self as usize as u64
    }
    #[inline]
    unsafe fn from_word(word: u64) -> Self {
        word as usize as *const T
    }
}

/// A transactional 64-bit scalar.
///
/// Reads and writes inside a transaction acquire the read or write lock
/// covering the cell's address and abort the transaction when the arbiter
/// rules die; the driver then retries the whole block. Outside a transaction
/// the cell behaves like a plain value.
#[repr(C, align(8))]
pub struct TCell<T: TmValue> {
    word: UnsafeCell<u64>,
    _marker: PhantomData<T>,
}

// SAFETY: concurrent access is mediated by the STM locking protocol; outside
// transactions the user carries the usual data-race obligations of a shared
// plain value, which is why T must still be Send.
unsafe impl<T: TmValue + Send> Send for TCell<T> {}
unsafe impl<T: TmValue + Send> Sync for TCell<T> {}

impl<T: TmValue> TCell<T> {
    /// A cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            word: UnsafeCell::new(value.into_word()),
            _marker: PhantomData,
        }
    }

    /// Address of the underlying word, for integrating external concurrency
    /// controls through [`crate::raw`].
    #[inline]
    pub fn as_ptr(&self) -> *mut u64 {
        self.word.get()
    }

    /// Read the value. Transactional when a transaction is in flight.
    #[inline]
    pub fn load(&self) -> T {
        match stm::current_op() {
            None => {
                // SAFETY: plain access; outside transactions the cell is an
                // ordinary value.
                unsafe { T::from_word(self.word.get().read()) }
            }
            Some(op) => {
                let stm = stm::global();
                if !stm
                    .locks
                    .try_read_lock(&stm.clock, &stm.board, op, self.word.get() as usize)
                {
                    stm::abort_and_restart(op);
                }
                // SAFETY: read lock held for the rest of the transaction.
                unsafe { T::from_word(self.word.get().read()) }
            }
        }
    }

    /// Write the value. Transactional when a transaction is in flight.
    #[inline]
    pub fn store(&self, value: T) {
        match stm::current_op() {
            None => {
                // SAFETY: plain access outside transactions.
                unsafe { self.word.get().write(value.into_word()) }
            }
            Some(op) => {
                let stm = stm::global();
                if !stm
                    .locks
                    .try_write_lock(&stm.clock, &stm.board, op, self.word.get() as usize)
                {
                    stm::abort_and_restart(op);
                }
                // SAFETY: write lock held and the prior word is in the undo
                // log.
                unsafe { self.word.get().write(value.into_word()) }
            }
        }
    }
}

impl<T: TmValue> From<T> for TCell<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: TmValue + Default> Default for TCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: TmValue + fmt::Debug> fmt::Debug for TCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TCell").field(&self.load()).finish()
    }
}

impl<T: TmValue + PartialEq> PartialEq<T> for TCell<T> {
    fn eq(&self, other: &T) -> bool {
        self.load() == *other
    }
}

impl<T: TmValue + PartialOrd> PartialOrd<T> for TCell<T> {
    fn partial_cmp(&self, other: &T) -> Option<core::cmp::Ordering> {
        self.load().partial_cmp(other)
    }
}

// Compound assignment decomposes into an instrumented load and store.
impl<T: TmValue + core::ops::Add<Output = T>> AddAssign<T> for TCell<T> {
    fn add_assign(&mut self, rhs: T) {
        self.store(self.load() + rhs);
    }
}

impl<T: TmValue + core::ops::Sub<Output = T>> SubAssign<T> for TCell<T> {
    fn sub_assign(&mut self, rhs: T) {
        self.store(self.load() - rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_access_outside_transaction() {
        let cell = TCell::new(41u64);
        assert_eq!(cell.load(), 41);
        cell.store(42);
        assert_eq!(cell.load(), 42);
    }

    #[test]
    fn test_value_round_trips() {
        assert!(unsafe { bool::from_word(true.into_word()) });
        assert_eq!(unsafe { i64::from_word((-5i64).into_word()) }, -5);
        let p = &mut 3u32 as *mut u32;
        assert_eq!(unsafe { <*mut u32>::from_word(p.into_word()) }, p);
    }

    #[test]
    fn test_operator_surface() {
        let mut cell = TCell::new(10i64);
        cell += 5;
        cell -= 3;
        assert_eq!(cell.load(), 12);
        assert!(cell == 12);
        assert!(cell > 11);
    }
}
